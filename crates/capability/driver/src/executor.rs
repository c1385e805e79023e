//! 驱动执行器
//!
//! 一次调用的顺序固定：资源锁 → 确保驱动已加载 → 取出/打开句柄 → 插件调用 → 归还句柄 → 释放锁。
//! 插件调用在阻塞线程中执行，资源锁随调用一起移入该线程；
//! 调用超时或取消时异步侧立即返回，锁直到插件真正停止才释放。

use crate::error::DriverError;
use crate::host::{HostIo, ResourceHandle, SerialSettings, open_serial};
use crate::manager::{DriverManager, parse_driver_resource_id};
use crate::plugin::CallControl;
use crate::result::{map_result_fields, parse_output};
use crate::types::{DEFAULT_FUNCTION, DriverContext, DriverResult};
use domain::{CollectData, Device, ResourceType};
use gw_storage::{DriverStore, ResourceStore};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_TCP_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TCP_READ_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_OPEN_RETRIES: u32 = 1;
pub const DEFAULT_OPEN_BACKOFF: Duration = Duration::from_millis(200);

/// 资源互斥键：绑定资源按 id，未绑定设备按自身端点
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Id(i64),
    Endpoint(String),
}

/// 超时与重试参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub serial_read_timeout: Duration,
    pub tcp_dial_timeout: Duration,
    pub tcp_read_timeout: Duration,
    pub serial_open_retries: u32,
    pub tcp_dial_retries: u32,
    pub serial_open_backoff: Duration,
    pub tcp_dial_backoff: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            serial_read_timeout: DEFAULT_SERIAL_READ_TIMEOUT,
            tcp_dial_timeout: DEFAULT_TCP_DIAL_TIMEOUT,
            tcp_read_timeout: DEFAULT_TCP_READ_TIMEOUT,
            serial_open_retries: DEFAULT_OPEN_RETRIES,
            tcp_dial_retries: DEFAULT_OPEN_RETRIES,
            serial_open_backoff: DEFAULT_OPEN_BACKOFF,
            tcp_dial_backoff: DEFAULT_OPEN_BACKOFF,
        }
    }
}

fn or_default(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() { fallback } else { value }
}

/// 一次调用的目标资源
#[derive(Debug, Clone)]
struct Target {
    key: ResourceKey,
    resource_id: i64,
    kind: ResourceType,
    path: String,
}

type ResourceSlot = Arc<AsyncMutex<Option<ResourceHandle>>>;

/// 设备忙标记，离开作用域自动清除
struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<i64>>,
    device_id: i64,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.device_id);
    }
}

pub struct DriverExecutor {
    manager: Arc<DriverManager>,
    drivers: Arc<dyn DriverStore>,
    resources: Arc<dyn ResourceStore>,
    slots: Mutex<HashMap<ResourceKey, ResourceSlot>>,
    busy: Mutex<HashSet<i64>>,
    settings: RwLock<ExecutorSettings>,
}

impl DriverExecutor {
    pub fn new(
        manager: Arc<DriverManager>,
        drivers: Arc<dyn DriverStore>,
        resources: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            manager,
            drivers,
            resources,
            slots: Mutex::new(HashMap::new()),
            busy: Mutex::new(HashSet::new()),
            settings: RwLock::new(ExecutorSettings::default()),
        }
    }

    pub fn manager(&self) -> &Arc<DriverManager> {
        &self.manager
    }

    pub fn settings(&self) -> ExecutorSettings {
        *self.settings.read()
    }

    /// 0 表示恢复默认值
    pub fn set_timeouts(&self, serial_read: Duration, tcp_dial: Duration, tcp_read: Duration) {
        let mut settings = self.settings.write();
        settings.serial_read_timeout = or_default(serial_read, DEFAULT_SERIAL_READ_TIMEOUT);
        settings.tcp_dial_timeout = or_default(tcp_dial, DEFAULT_TCP_DIAL_TIMEOUT);
        settings.tcp_read_timeout = or_default(tcp_read, DEFAULT_TCP_READ_TIMEOUT);
    }

    pub fn set_retries(
        &self,
        serial_open: u32,
        tcp_dial: u32,
        serial_backoff: Duration,
        tcp_backoff: Duration,
    ) {
        let mut settings = self.settings.write();
        settings.serial_open_retries = serial_open;
        settings.tcp_dial_retries = tcp_dial;
        settings.serial_open_backoff = serial_backoff;
        settings.tcp_dial_backoff = tcp_backoff;
    }

    pub fn set_call_timeout(&self, timeout: Duration) {
        self.manager.set_call_timeout(timeout);
    }

    /// 读路径：执行 `handle` 并映射为 CollectData
    pub async fn collect_data(
        &self,
        device: &Device,
        cancel: &CancellationToken,
    ) -> Result<CollectData, DriverError> {
        let result = self.execute(device, DEFAULT_FUNCTION, None, cancel).await?;
        Ok(CollectData {
            device_id: device.id,
            device_name: device.name.clone(),
            product_key: device.product_key.clone(),
            device_key: device.device_key.clone(),
            timestamp_ms: result.timestamp,
            fields: map_result_fields(&result),
        })
    }

    /// 写路径：函数名为空时调用 `handle`；参数合并进上下文 config
    pub async fn execute_command(
        &self,
        device: &Device,
        function: &str,
        params: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<DriverResult, DriverError> {
        let function = match function.trim() {
            "" => DEFAULT_FUNCTION,
            name => name,
        };
        self.execute(device, function, Some(params), cancel).await
    }

    /// 执行一次驱动调用，返回成功的结果信封
    pub async fn execute(
        &self,
        device: &Device,
        function: &str,
        params: Option<&BTreeMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<DriverResult, DriverError> {
        let _busy = self.mark_busy(device)?;
        let driver_id = device
            .driver_id
            .ok_or_else(|| DriverError::NotFound(format!("device {} has no driver", device.name)))?;
        let target = self.resolve_target(device).await?;

        let slot = self.slot(&target.key);
        let mut guard = tokio::select! {
            guard = slot.lock_owned() => guard,
            _ = cancel.cancelled() => return Err(DriverError::Canceled),
        };

        self.ensure_loaded(driver_id).await?;
        let loaded = self
            .manager
            .loaded(driver_id)
            .ok_or(DriverError::NotLoaded(driver_id))?;

        if guard.is_none() && !target.path.is_empty() {
            *guard = Some(self.open_handle(&target, device, cancel).await?);
        }

        let ctx = build_context(device, &target, function, params);
        let input = serde_json::to_vec(&ctx)
            .map_err(|err| DriverError::InvalidConfig(format!("driver context: {}", err)))?;

        let settings = self.settings();
        let timeout = device.call_timeout().min(self.manager.call_timeout());
        let deadline = Instant::now() + timeout;
        let control = CallControl::new(Some(deadline));
        let call_control = control.clone();
        let function_name = function.to_string();
        let resource_id = target.resource_id;

        let task = tokio::task::spawn_blocking(move || {
            run_call(
                guard,
                loaded,
                &function_name,
                &input,
                resource_id,
                settings,
                &call_control,
            )
        });

        let output = tokio::select! {
            joined = tokio::time::timeout(timeout, task) => match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => Err(DriverError::ExecutionFailed(format!("driver task failed: {}", err))),
                Err(_) => {
                    control.cancel();
                    Err(DriverError::DriverTimeout)
                }
            },
            _ = cancel.cancelled() => {
                control.cancel();
                Err(DriverError::Canceled)
            }
        };

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                if matches!(err, DriverError::DriverTimeout) {
                    gw_telemetry::record_driver_timeout();
                }
                warn!(
                    target: "gw.driver",
                    device_id = device.id,
                    device = %device.name,
                    resource_id = target.resource_id,
                    function,
                    error = %err,
                    "driver_call_failed"
                );
                return Err(err);
            }
        };

        let result = parse_output(output)?;
        if !result.success {
            let message = if result.error.is_empty() {
                "driver reported failure".to_string()
            } else {
                result.error.clone()
            };
            return Err(DriverError::ExecutionFailed(message));
        }
        debug!(
            target: "gw.driver",
            device_id = device.id,
            function,
            points = result.points.len(),
            "driver_call_ok"
        );
        Ok(result)
    }

    /// 关闭某个资源的缓存句柄（等待进行中的调用结束）
    pub async fn close_resource(&self, resource_id: i64) {
        let slot = self.slots.lock().get(&ResourceKey::Id(resource_id)).cloned();
        if let Some(slot) = slot {
            if slot.lock().await.take().is_some() {
                info!(target: "gw.driver", resource_id, "resource_closed");
            }
        }
    }

    pub async fn close_all_resources(&self) {
        let slots: Vec<ResourceSlot> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            slot.lock().await.take();
        }
        info!(target: "gw.driver", "resources_closed");
    }

    fn mark_busy(&self, device: &Device) -> Result<BusyGuard<'_>, DriverError> {
        if !self.busy.lock().insert(device.id) {
            return Err(DriverError::ExecutionFailed(format!(
                "device {} is already being read",
                device.name
            )));
        }
        Ok(BusyGuard {
            busy: &self.busy,
            device_id: device.id,
        })
    }

    fn slot(&self, key: &ResourceKey) -> ResourceSlot {
        self.slots
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    async fn resolve_target(&self, device: &Device) -> Result<Target, DriverError> {
        if let Some(resource_id) = device.resource_id.filter(|id| *id > 0) {
            let resource = self
                .resources
                .get_resource(resource_id)
                .await?
                .ok_or_else(|| DriverError::NotFound(format!("resource {}", resource_id)))?;
            if !resource.enabled {
                return Err(DriverError::ResourceOpen(format!(
                    "resource {} is disabled",
                    resource.name
                )));
            }
            return Ok(Target {
                key: ResourceKey::Id(resource.id),
                resource_id: resource.id,
                kind: resource.kind,
                path: resource.path.trim().to_string(),
            });
        }
        let kind = device.resource_type();
        let path = match kind {
            ResourceType::Net => device.endpoint().unwrap_or_default(),
            ResourceType::Serial => device.serial_port.trim().to_string(),
        };
        let key = if path.is_empty() {
            ResourceKey::Endpoint(format!("device:{}", device.id))
        } else {
            ResourceKey::Endpoint(path.clone())
        };
        Ok(Target {
            key,
            resource_id: 0,
            kind,
            path,
        })
    }

    /// 未加载或绑定资源变化时重新加载
    async fn ensure_loaded(&self, driver_id: i64) -> Result<(), DriverError> {
        let driver = self
            .drivers
            .get_driver(driver_id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("driver {}", driver_id)))?;
        let expected = parse_driver_resource_id(&driver);
        if self.manager.loaded_resource_id(driver_id) == Some(expected) {
            return Ok(());
        }
        let manager = self.manager.clone();
        tokio::task::spawn_blocking(move || manager.load_driver(&driver))
            .await
            .map_err(|err| DriverError::ExecutionFailed(format!("driver load task failed: {}", err)))?
    }

    async fn open_handle(
        &self,
        target: &Target,
        device: &Device,
        cancel: &CancellationToken,
    ) -> Result<ResourceHandle, DriverError> {
        let settings = self.settings();
        let (retries, backoff) = match target.kind {
            ResourceType::Serial => (settings.serial_open_retries, settings.serial_open_backoff),
            ResourceType::Net => (settings.tcp_dial_retries, settings.tcp_dial_backoff),
        };
        let mut last_error = String::new();
        for attempt in 0..=retries {
            if attempt > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(DriverError::Canceled),
                }
            }
            let opened = match target.kind {
                ResourceType::Serial => open_serial_handle(target, device, settings).await,
                ResourceType::Net => dial_tcp_handle(target, settings).await,
            };
            match opened {
                Ok(handle) => {
                    info!(
                        target: "gw.driver",
                        resource_id = target.resource_id,
                        path = %target.path,
                        kind = handle.kind(),
                        "resource_opened"
                    );
                    return Ok(handle);
                }
                Err(err) => {
                    warn!(
                        target: "gw.driver",
                        resource_id = target.resource_id,
                        path = %target.path,
                        attempt,
                        error = %err,
                        "resource_open_failed"
                    );
                    last_error = err;
                }
            }
        }
        Err(DriverError::ResourceOpen(format!(
            "{}: {}",
            target.path, last_error
        )))
    }
}

async fn open_serial_handle(
    target: &Target,
    device: &Device,
    settings: ExecutorSettings,
) -> Result<ResourceHandle, String> {
    let path = target.path.clone();
    let line = SerialSettings::from_device(device);
    let read_timeout = settings.serial_read_timeout;
    tokio::task::spawn_blocking(move || open_serial(&path, &line, read_timeout))
        .await
        .map_err(|err| err.to_string())?
        .map(ResourceHandle::Serial)
        .map_err(|err| err.to_string())
}

async fn dial_tcp_handle(
    target: &Target,
    settings: ExecutorSettings,
) -> Result<ResourceHandle, String> {
    let connect = tokio::net::TcpStream::connect(target.path.as_str());
    let stream = tokio::time::timeout(settings.tcp_dial_timeout, connect)
        .await
        .map_err(|_| "dial timeout".to_string())?
        .map_err(|err| err.to_string())?;
    let _ = stream.set_nodelay(true);
    let stream = stream.into_std().map_err(|err| err.to_string())?;
    stream.set_nonblocking(false).map_err(|err| err.to_string())?;
    Ok(ResourceHandle::Tcp(stream))
}

/// 阻塞线程中的调用主体：借出句柄、调用插件、归还句柄
fn run_call(
    mut guard: OwnedMutexGuard<Option<ResourceHandle>>,
    loaded: crate::manager::SharedDriver,
    function: &str,
    input: &[u8],
    resource_id: i64,
    settings: ExecutorSettings,
    control: &CallControl,
) -> Result<crate::types::PluginOutput, DriverError> {
    let mut io = HostIo::new(
        resource_id,
        guard.take(),
        settings.serial_read_timeout,
        settings.tcp_read_timeout,
    )
    .with_deadline(control.deadline);
    let result = {
        let mut driver = loaded.lock();
        let result = driver.plugin.call(function, input, &mut io, control);
        driver.last_active_ms = domain::now_epoch_ms();
        result
    };
    let (handle, broken) = io.into_parts();
    if broken {
        debug!(target: "gw.driver", resource_id, "resource_connection_dropped");
    }
    *guard = handle;
    result
}

/// 组装插件输入上下文
fn build_context(
    device: &Device,
    target: &Target,
    function: &str,
    params: Option<&BTreeMap<String, String>>,
) -> DriverContext {
    let mut config = BTreeMap::new();
    match target.kind {
        ResourceType::Serial => {
            let line = SerialSettings::from_device(device);
            config.insert("serial_port".to_string(), target.path.clone());
            config.insert("baud_rate".to_string(), line.baud_rate.to_string());
            config.insert("data_bits".to_string(), line.data_bits.to_string());
            config.insert("stop_bits".to_string(), line.stop_bits.to_string());
            config.insert("parity".to_string(), line.parity.to_string());
        }
        ResourceType::Net => {
            config.insert("ip_address".to_string(), device.ip_address.trim().to_string());
            config.insert("port_num".to_string(), device.port_num.to_string());
        }
    }
    config.insert(
        "device_address".to_string(),
        device.device_address.trim().to_string(),
    );
    let func_name = if function == DEFAULT_FUNCTION {
        "read".to_string()
    } else {
        function.to_string()
    };
    config.insert("func_name".to_string(), func_name);
    if let Some(params) = params {
        for (key, value) in params {
            let key = key.trim();
            if !key.is_empty() {
                config.insert(key.to_string(), value.clone());
            }
        }
    }
    DriverContext {
        device_id: device.id,
        device_name: device.name.clone(),
        resource_id: target.resource_id,
        resource_type: target.kind.as_str().to_string(),
        config,
        device_config: String::new(),
    }
}
