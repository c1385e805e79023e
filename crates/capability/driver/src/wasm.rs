//! WASM 插件沙箱
//!
//! - 共享一个 `Engine`，后台线程周期推进 epoch，调用截止/取消在 epoch 回调里检查
//! - 每个插件持有一份常驻 `Store` + `Instance`，超时后实例仍可继续调用
//! - 宿主函数注册在 `env` 命名空间，指针/长度越界一律返回 0

use crate::error::DriverError;
use crate::host::HostIo;
use crate::plugin::CallControl;
use crate::result::parse_version_output;
use crate::types::{DEFAULT_FUNCTION, PluginOutput};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use wasmtime::{
    Caller, Config, Engine, Extern, ExternType, Instance, Linker, Module, Store, UpdateDeadline,
};

const EPOCH_TICK: Duration = Duration::from_millis(10);
const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION_TIMEOUT: Duration = Duration::from_secs(2);
const HOST_NAMESPACE: &str = "env";

fn wasm_err(err: impl std::fmt::Display) -> DriverError {
    DriverError::Wasm(format!("{:#}", err))
}

/// WASM 运行时（Engine + epoch 推进线程）
pub struct WasmRuntime {
    engine: Engine,
    stop: Arc<AtomicBool>,
}

impl WasmRuntime {
    pub fn new() -> Result<Self, DriverError> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(wasm_err)?;
        let stop = Arc::new(AtomicBool::new(false));
        let ticker_engine = engine.clone();
        let ticker_stop = stop.clone();
        std::thread::Builder::new()
            .name("wasm-epoch".to_string())
            .spawn(move || {
                while !ticker_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    ticker_engine.increment_epoch();
                }
            })?;
        Ok(Self { engine, stop })
    }
}

impl Drop for WasmRuntime {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Timeout,
    Canceled,
}

#[derive(Default)]
struct HostState {
    input: Vec<u8>,
    output: Vec<u8>,
    error: Vec<u8>,
    io: HostIo,
    control: CallControl,
    interrupted: Option<Interrupt>,
}

/// 校验插件内存区间：0 < ptr ≤ u32::MAX，size > 0，且不越界
fn guest_range(ptr: i64, size: i64, memory_len: usize) -> Option<std::ops::Range<usize>> {
    if ptr <= 0 || ptr > u32::MAX as i64 || size <= 0 {
        return None;
    }
    let start = ptr as usize;
    let end = start.checked_add(size as usize)?;
    if end > memory_len {
        return None;
    }
    Some(start..end)
}

fn read_guest(caller: &mut Caller<'_, HostState>, ptr: i64, size: i64) -> Option<Vec<u8>> {
    let memory = caller.get_export("memory").and_then(Extern::into_memory)?;
    let range = guest_range(ptr, size, memory.data_size(&*caller))?;
    Some(memory.data(&*caller)[range].to_vec())
}

fn guest_capacity_ok(caller: &mut Caller<'_, HostState>, ptr: i64, size: i64) -> bool {
    let Some(memory) = caller.get_export("memory").and_then(Extern::into_memory) else {
        return false;
    };
    guest_range(ptr, size, memory.data_size(&*caller)).is_some()
}

/// 写入插件内存，返回写入字节数（失败为 0）
fn write_guest(caller: &mut Caller<'_, HostState>, ptr: i64, capacity: i64, bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let Some(memory) = caller.get_export("memory").and_then(Extern::into_memory) else {
        return 0;
    };
    let len = bytes.len().min(capacity.max(0) as usize);
    let Some(range) = guest_range(ptr, len as i64, memory.data_size(&*caller)) else {
        return 0;
    };
    match memory.write(&mut *caller, range.start, &bytes[..len]) {
        Ok(()) => len as i64,
        Err(_) => 0,
    }
}

fn register_host_functions(linker: &mut Linker<HostState>) -> Result<(), DriverError> {
    linker
        .func_wrap(HOST_NAMESPACE, "input_length", |caller: Caller<'_, HostState>| -> i64 {
            caller.data().input.len() as i64
        })
        .map_err(wasm_err)?;

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "input_read",
            |mut caller: Caller<'_, HostState>, ptr: i64, size: i64| -> i64 {
                let input = caller.data().input.clone();
                write_guest(&mut caller, ptr, size, &input)
            },
        )
        .map_err(wasm_err)?;

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "output_write",
            |mut caller: Caller<'_, HostState>, ptr: i64, size: i64| -> i64 {
                let Some(bytes) = read_guest(&mut caller, ptr, size) else {
                    return 0;
                };
                caller.data_mut().output.extend_from_slice(&bytes);
                bytes.len() as i64
            },
        )
        .map_err(wasm_err)?;

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "error_write",
            |mut caller: Caller<'_, HostState>, ptr: i64, size: i64| -> i64 {
                let Some(bytes) = read_guest(&mut caller, ptr, size) else {
                    return 0;
                };
                caller.data_mut().error.extend_from_slice(&bytes);
                bytes.len() as i64
            },
        )
        .map_err(wasm_err)?;

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "serial_read",
            |mut caller: Caller<'_, HostState>, ptr: i64, size: i64| -> i64 {
                if !guest_capacity_ok(&mut caller, ptr, size) {
                    return 0;
                }
                let data = caller.data_mut().io.serial_read(size as usize);
                write_guest(&mut caller, ptr, size, &data)
            },
        )
        .map_err(wasm_err)?;

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "serial_write",
            |mut caller: Caller<'_, HostState>, ptr: i64, size: i64| -> i64 {
                let Some(bytes) = read_guest(&mut caller, ptr, size) else {
                    return 0;
                };
                caller.data_mut().io.serial_write(&bytes) as i64
            },
        )
        .map_err(wasm_err)?;

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "serial_transceive",
            |mut caller: Caller<'_, HostState>,
             write_ptr: i64,
             write_len: i64,
             read_ptr: i64,
             read_cap: i64,
             timeout_ms: i64|
             -> i64 {
                if !guest_capacity_ok(&mut caller, read_ptr, read_cap) {
                    return 0;
                }
                let Some(request) = read_guest(&mut caller, write_ptr, write_len) else {
                    return 0;
                };
                let reply =
                    caller
                        .data_mut()
                        .io
                        .serial_transceive(&request, read_cap as usize, timeout_ms);
                write_guest(&mut caller, read_ptr, read_cap, &reply)
            },
        )
        .map_err(wasm_err)?;

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "tcp_transceive",
            |mut caller: Caller<'_, HostState>,
             write_ptr: i64,
             write_len: i64,
             read_ptr: i64,
             read_cap: i64,
             timeout_ms: i64|
             -> i64 {
                if !guest_capacity_ok(&mut caller, read_ptr, read_cap) {
                    return 0;
                }
                let Some(request) = read_guest(&mut caller, write_ptr, write_len) else {
                    return 0;
                };
                let reply = caller
                    .data_mut()
                    .io
                    .tcp_transceive(&request, read_cap as usize, timeout_ms);
                write_guest(&mut caller, read_ptr, read_cap, &reply)
            },
        )
        .map_err(wasm_err)?;

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "sleep_ms",
            |caller: Caller<'_, HostState>, ms: i64| {
                caller.data().io.sleep_ms(ms);
            },
        )
        .map_err(wasm_err)?;

    Ok(())
}

/// 单个 WASM 插件实例
pub struct WasmPlugin {
    name: String,
    store: Store<HostState>,
    instance: Instance,
    exports: Vec<String>,
    config: String,
}

impl WasmPlugin {
    /// 编译并实例化；要求导出 `handle`
    pub fn load(runtime: &WasmRuntime, name: &str, bytes: &[u8]) -> Result<Self, DriverError> {
        if bytes.is_empty() {
            return Err(DriverError::InvalidConfig(format!(
                "driver {} wasm is empty",
                name
            )));
        }
        let module = Module::new(&runtime.engine, bytes).map_err(wasm_err)?;
        let exports: Vec<String> = module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .collect();
        if !exports.iter().any(|export| export == DEFAULT_FUNCTION) {
            return Err(DriverError::InvalidConfig(format!(
                "driver {} does not export {}",
                name, DEFAULT_FUNCTION
            )));
        }

        let mut linker = Linker::new(&runtime.engine);
        register_host_functions(&mut linker)?;

        let mut store = Store::new(&runtime.engine, HostState::default());
        store.epoch_deadline_callback(|mut ctx| {
            let state = ctx.data_mut();
            if state.control.is_canceled() {
                state.interrupted = Some(Interrupt::Canceled);
                return Err(wasmtime::Error::msg("driver call canceled"));
            }
            if state.control.is_expired() {
                state.interrupted = Some(Interrupt::Timeout);
                return Err(wasmtime::Error::msg("driver call deadline exceeded"));
            }
            Ok(UpdateDeadline::Continue(1))
        });
        store.data_mut().control = CallControl::new(Some(Instant::now() + INIT_TIMEOUT));
        store.set_epoch_deadline(1);
        let instance = linker.instantiate(&mut store, &module).map_err(wasm_err)?;

        Ok(Self {
            name: name.to_string(),
            store,
            instance,
            exports,
            config: String::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 保存驱动配置；插件导出 `init` 时以配置为输入调用一次
    pub fn init(&mut self, config: &str) -> Result<(), DriverError> {
        self.config = config.to_string();
        if !self.function_exists("init") {
            return Ok(());
        }
        let mut io = HostIo::default();
        let control = CallControl::new(Some(Instant::now() + INIT_TIMEOUT));
        let output = self.call("init", config.as_bytes(), &mut io, &control)?;
        if output.rc != 0 {
            return Err(DriverError::InvalidConfig(format!(
                "driver {} init returned {}: {}",
                self.name, output.rc, output.error
            )));
        }
        Ok(())
    }

    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn function_exists(&self, name: &str) -> bool {
        self.exports.iter().any(|export| export == name)
    }

    pub fn functions(&self) -> Vec<String> {
        self.exports.clone()
    }

    pub fn call(
        &mut self,
        function: &str,
        input: &[u8],
        io: &mut HostIo,
        control: &CallControl,
    ) -> Result<PluginOutput, DriverError> {
        if !self.function_exists(function) {
            return Err(DriverError::ExecutionFailed(format!(
                "plugin function not found: {}",
                function
            )));
        }
        let func = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, function)
            .map_err(wasm_err)?;

        {
            let state = self.store.data_mut();
            state.input = input.to_vec();
            state.output.clear();
            state.error.clear();
            state.io = std::mem::take(io);
            state.control = control.clone();
            state.interrupted = None;
        }
        self.store.set_epoch_deadline(1);
        let result = func.call(&mut self.store, ());

        let state = self.store.data_mut();
        *io = std::mem::take(&mut state.io);
        state.input.clear();
        let interrupted = state.interrupted.take();
        let output = std::mem::take(&mut state.output);
        let error = String::from_utf8_lossy(&std::mem::take(&mut state.error)).into_owned();

        match result {
            Ok(rc) => Ok(PluginOutput { rc, output, error }),
            Err(err) => match interrupted {
                Some(Interrupt::Timeout) => Err(DriverError::DriverTimeout),
                Some(Interrupt::Canceled) => Err(DriverError::Canceled),
                None => Err(wasm_err(err)),
            },
        }
    }

    /// 调用可选导出 `version`，输出 `{success, version}`
    pub fn version(&mut self) -> Result<String, DriverError> {
        if !self.function_exists("version") {
            return Ok(String::new());
        }
        let mut io = HostIo::default();
        let control = CallControl::new(Some(Instant::now() + VERSION_TIMEOUT));
        let output = self.call("version", b"{}", &mut io, &control)?;
        if output.output.is_empty() && !output.error.is_empty() {
            return Err(DriverError::ExecutionFailed(format!(
                "driver version error: {}",
                output.error
            )));
        }
        parse_version_output(&output.output)
    }

    pub fn close(&mut self) {
        self.store.data_mut().io = HostIo::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 生成一个把固定 JSON 写到输出的模块
    fn fixed_output_module(json: &str, extra: &str) -> String {
        let escaped: String = json.bytes().map(|b| format!("\\{:02x}", b)).collect();
        format!(
            r#"(module
  (import "env" "output_write" (func $out (param i64 i64) (result i64)))
  (memory (export "memory") 1)
  (data (i32.const 1024) "{escaped}")
  (func (export "handle") (result i32)
    (drop (call $out (i64.const 1024) (i64.const {len})))
    (i32.const 0))
  {extra})"#,
            escaped = escaped,
            len = json.len(),
            extra = extra
        )
    }

    const ECHO_MODULE: &str = r#"(module
  (import "env" "input_length" (func $len (result i64)))
  (import "env" "input_read" (func $read (param i64 i64) (result i64)))
  (import "env" "output_write" (func $out (param i64 i64) (result i64)))
  (memory (export "memory") 1)
  (func (export "handle") (result i32)
    (local $n i64)
    (local.set $n (call $read (i64.const 4096) (call $len)))
    (drop (call $out (i64.const 4096) (local.get $n)))
    (i32.const 0))
  (func (export "spin") (result i32)
    (loop $forever (br $forever))
    (i32.const 0)))"#;

    fn runtime() -> WasmRuntime {
        WasmRuntime::new().expect("runtime")
    }

    fn control(ms: u64) -> CallControl {
        CallControl::new(Some(Instant::now() + Duration::from_millis(ms)))
    }

    #[test]
    fn handle_output_is_collected() {
        let runtime = runtime();
        let json = r#"{"success":true,"points":[{"field_name":"temperature","value":25.5}]}"#;
        let mut plugin =
            WasmPlugin::load(&runtime, "fixed", fixed_output_module(json, "").as_bytes())
                .expect("load");
        let output = plugin
            .call("handle", b"{}", &mut HostIo::default(), &control(1_000))
            .expect("call");
        assert_eq!(output.rc, 0);
        assert_eq!(String::from_utf8(output.output).expect("utf8"), json);
    }

    #[test]
    fn input_is_readable_by_guest() {
        let runtime = runtime();
        let mut plugin = WasmPlugin::load(&runtime, "echo", ECHO_MODULE.as_bytes()).expect("load");
        let output = plugin
            .call("handle", br#"{"device_id":1}"#, &mut HostIo::default(), &control(1_000))
            .expect("call");
        assert_eq!(output.output, br#"{"device_id":1}"#);
    }

    #[test]
    fn runaway_guest_times_out_and_stays_usable() {
        let runtime = runtime();
        let mut plugin = WasmPlugin::load(&runtime, "echo", ECHO_MODULE.as_bytes()).expect("load");
        let err = plugin
            .call("spin", b"", &mut HostIo::default(), &control(50))
            .expect_err("timeout");
        assert!(matches!(err, DriverError::DriverTimeout));

        let output = plugin
            .call("handle", b"again", &mut HostIo::default(), &control(1_000))
            .expect("call after timeout");
        assert_eq!(output.output, b"again");
    }

    #[test]
    fn canceled_guest_reports_canceled() {
        let runtime = runtime();
        let mut plugin = WasmPlugin::load(&runtime, "echo", ECHO_MODULE.as_bytes()).expect("load");
        let control = control(5_000);
        let canceler = control.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            canceler.cancel();
        });
        let err = plugin
            .call("spin", b"", &mut HostIo::default(), &control)
            .expect_err("canceled");
        handle.join().expect("join");
        assert!(matches!(err, DriverError::Canceled));
    }

    #[test]
    fn invalid_pointer_writes_nothing() {
        let runtime = runtime();
        let module = r#"(module
  (import "env" "output_write" (func $out (param i64 i64) (result i64)))
  (memory (export "memory") 1)
  (func (export "handle") (result i32)
    (i32.wrap_i64 (call $out (i64.const 0) (i64.const 4)))))"#;
        let mut plugin = WasmPlugin::load(&runtime, "bad", module.as_bytes()).expect("load");
        let output = plugin
            .call("handle", b"", &mut HostIo::default(), &control(1_000))
            .expect("call");
        assert_eq!(output.rc, 0);
        assert!(output.output.is_empty());
    }

    #[test]
    fn missing_handle_is_rejected() {
        let runtime = runtime();
        let result = WasmPlugin::load(&runtime, "empty", b"(module)");
        assert!(matches!(result, Err(DriverError::InvalidConfig(_))));
    }

    #[test]
    fn version_export_is_parsed() {
        let runtime = runtime();
        let version_json = r#"{"success":true,"version":"2.1.0"}"#;
        let escaped: String = version_json
            .bytes()
            .map(|b| format!("\\{:02x}", b))
            .collect();
        let extra = format!(
            r#"(data (i32.const 2048) "{}")
  (func (export "version") (result i32)
    (drop (call $out (i64.const 2048) (i64.const {})))
    (i32.const 0))"#,
            escaped,
            version_json.len()
        );
        let module = fixed_output_module(r#"{"success":true}"#, &extra);
        let mut plugin = WasmPlugin::load(&runtime, "versioned", module.as_bytes()).expect("load");
        assert_eq!(plugin.version().expect("version"), "2.1.0");
        assert!(plugin.function_exists("version"));
        assert!(!plugin.function_exists("write"));
    }

    #[test]
    fn guest_range_validation() {
        assert!(guest_range(0, 4, 100).is_none());
        assert!(guest_range(10, 0, 100).is_none());
        assert!(guest_range(98, 4, 100).is_none());
        assert!(guest_range(u32::MAX as i64 + 1, 1, usize::MAX).is_none());
        assert_eq!(guest_range(10, 4, 100), Some(10..14));
    }
    #[test]
    fn failed_init_carries_guest_error() {
        let runtime = runtime();
        let module = r#"(module
  (import "env" "error_write" (func $err (param i64 i64) (result i64)))
  (memory (export "memory") 1)
  (data (i32.const 2048) "bad port")
  (func (export "handle") (result i32)
    (i32.const 0))
  (func (export "init") (result i32)
    (drop (call $err (i64.const 2048) (i64.const 8)))
    (i32.const 3)))"#;
        let mut plugin = WasmPlugin::load(&runtime, "picky", module.as_bytes()).expect("load");
        match plugin.init(r#"{"port":"COM9"}"#) {
            Err(DriverError::InvalidConfig(message)) => {
                assert!(message.contains("returned 3"));
                assert!(message.contains("bad port"));
            }
            other => panic!("unexpected init result: {other:?}"),
        }
        assert_eq!(plugin.config(), r#"{"port":"COM9"}"#);
    }
}
