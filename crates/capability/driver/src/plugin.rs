//! 插件抽象：WASM 沙箱插件与原生驱动的统一能力集

use crate::error::DriverError;
use crate::host::HostIo;
use crate::types::PluginOutput;
use crate::wasm::WasmPlugin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// 单次调用的中断控制：截止时间 + 取消标记
#[derive(Debug, Clone, Default)]
pub struct CallControl {
    pub deadline: Option<Instant>,
    cancel: Arc<AtomicBool>,
}

impl CallControl {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            deadline,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// 原生驱动（内置 Modbus、测试桩）
pub trait NativeDriver: Send {
    /// 一次性初始化，参数为驱动配置 JSON
    fn init(&mut self, config: &str) -> Result<(), DriverError>;

    /// 调用导出函数；输入为 DriverContext JSON
    fn call(
        &mut self,
        function: &str,
        input: &[u8],
        io: &mut HostIo,
    ) -> Result<PluginOutput, DriverError>;

    fn function_exists(&self, name: &str) -> bool;

    fn functions(&self) -> Vec<String>;

    fn version(&self) -> Option<String> {
        None
    }

    fn close(&mut self) {}
}

/// 已加载插件
pub enum Plugin {
    Wasm(WasmPlugin),
    Native(Box<dyn NativeDriver>),
}

impl Plugin {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Wasm(_) => "wasm",
            Self::Native(_) => "native",
        }
    }

    pub fn init(&mut self, config: &str) -> Result<(), DriverError> {
        match self {
            Self::Wasm(plugin) => plugin.init(config),
            Self::Native(driver) => driver.init(config),
        }
    }

    /// 调用插件函数；截止/取消由 `control` 传入
    pub fn call(
        &mut self,
        function: &str,
        input: &[u8],
        io: &mut HostIo,
        control: &CallControl,
    ) -> Result<PluginOutput, DriverError> {
        if control.is_canceled() {
            return Err(DriverError::Canceled);
        }
        if control.is_expired() {
            return Err(DriverError::DriverTimeout);
        }
        match self {
            Self::Wasm(plugin) => plugin.call(function, input, io, control),
            Self::Native(driver) => {
                let output = driver.call(function, input, io)?;
                if control.is_canceled() {
                    return Err(DriverError::Canceled);
                }
                Ok(output)
            }
        }
    }

    pub fn function_exists(&self, name: &str) -> bool {
        match self {
            Self::Wasm(plugin) => plugin.function_exists(name),
            Self::Native(driver) => driver.function_exists(name),
        }
    }

    pub fn functions(&self) -> Vec<String> {
        let mut names = match self {
            Self::Wasm(plugin) => plugin.functions(),
            Self::Native(driver) => driver.functions(),
        };
        names.sort();
        names
    }

    /// 驱动版本；未导出 `version` 时返回空串
    pub fn version(&mut self) -> Result<String, DriverError> {
        match self {
            Self::Wasm(plugin) => plugin.version(),
            Self::Native(driver) => Ok(driver.version().unwrap_or_default()),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Wasm(plugin) => plugin.close(),
            Self::Native(driver) => driver.close(),
        }
    }
}
