//! 驱动管理器：按驱动 id 维护已加载插件
//!
//! 执行器只通过 `load_driver` / `unload_driver` / `is_loaded` / `loaded` 访问这里，
//! 插件实例不持有执行器或管理器的引用。

use crate::builtin::{BUILTIN_PREFIX, BuiltinFactory, default_builtins};
use crate::error::DriverError;
use crate::plugin::{NativeDriver, Plugin};
use crate::types::LoadedDriverInfo;
use crate::wasm::{WasmPlugin, WasmRuntime};
use domain::Driver;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 默认单次调用超时
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// 已加载的驱动
pub struct LoadedDriver {
    pub id: i64,
    pub name: String,
    /// 加载时绑定的资源 id（0 表示未绑定）
    pub resource_id: i64,
    pub plugin: Plugin,
    pub version: String,
    pub last_active_ms: i64,
}

pub type SharedDriver = Arc<Mutex<LoadedDriver>>;

pub struct DriverManager {
    runtime: WasmRuntime,
    drivers_dir: PathBuf,
    loaded: RwLock<HashMap<i64, SharedDriver>>,
    builtins: RwLock<HashMap<String, BuiltinFactory>>,
    call_timeout: RwLock<Duration>,
}

impl DriverManager {
    pub fn new(drivers_dir: impl Into<PathBuf>) -> Result<Self, DriverError> {
        Ok(Self {
            runtime: WasmRuntime::new()?,
            drivers_dir: drivers_dir.into(),
            loaded: RwLock::new(HashMap::new()),
            builtins: RwLock::new(default_builtins()),
            call_timeout: RwLock::new(DEFAULT_CALL_TIMEOUT),
        })
    }

    pub fn drivers_dir(&self) -> &Path {
        &self.drivers_dir
    }

    /// 注册（或覆盖）一个内置原生驱动
    pub fn register_builtin<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn NativeDriver> + Send + Sync + 'static,
    {
        self.builtins
            .write()
            .insert(name.to_string(), Arc::new(factory));
    }

    /// 0 恢复默认值
    pub fn set_call_timeout(&self, timeout: Duration) {
        *self.call_timeout.write() = if timeout.is_zero() {
            DEFAULT_CALL_TIMEOUT
        } else {
            timeout
        };
    }

    pub fn call_timeout(&self) -> Duration {
        *self.call_timeout.read()
    }

    /// 插件文件路径：空路径回落到 `<drivers_dir>/<name>.wasm`，相对路径按驱动目录解析
    pub fn resolve_path(&self, driver: &Driver) -> PathBuf {
        let file_path = driver.file_path.trim();
        if file_path.is_empty() {
            return self.drivers_dir.join(format!("{}.wasm", driver.name));
        }
        let path = PathBuf::from(file_path);
        if path.is_absolute() || path.exists() {
            path
        } else {
            self.drivers_dir.join(path)
        }
    }

    fn instantiate(&self, driver: &Driver) -> Result<Plugin, DriverError> {
        if let Some(name) = driver.file_path.trim().strip_prefix(BUILTIN_PREFIX) {
            let factory = self
                .builtins
                .read()
                .get(name.trim())
                .cloned()
                .ok_or_else(|| DriverError::NotFound(format!("builtin driver {}", name)))?;
            return Ok(Plugin::Native(factory()));
        }
        let path = self.resolve_path(driver);
        let bytes = std::fs::read(&path)
            .map_err(|err| DriverError::NotFound(format!("{}: {}", path.display(), err)))?;
        Ok(Plugin::Wasm(WasmPlugin::load(&self.runtime, &driver.name, &bytes)?))
    }

    /// 加载（或替换）驱动；加载后立即读取版本号
    pub fn load_driver(&self, driver: &Driver) -> Result<(), DriverError> {
        let mut plugin = self.instantiate(driver)?;
        if let Err(err) = plugin.init(&driver.config_schema) {
            plugin.close();
            return Err(err);
        }
        let version = match plugin.version() {
            Ok(version) => version,
            Err(err) => {
                warn!(
                    target: "gw.driver",
                    driver_id = driver.id,
                    error = %err,
                    "driver_version_unavailable"
                );
                String::new()
            }
        };
        let resource_id = parse_driver_resource_id(driver);
        let kind = plugin.kind();
        let loaded = LoadedDriver {
            id: driver.id,
            name: driver.name.clone(),
            resource_id,
            plugin,
            version: version.clone(),
            last_active_ms: domain::now_epoch_ms(),
        };
        let previous = self
            .loaded
            .write()
            .insert(driver.id, Arc::new(Mutex::new(loaded)));
        if let Some(previous) = previous {
            previous.lock().plugin.close();
        }
        info!(
            target: "gw.driver",
            driver_id = driver.id,
            driver = %driver.name,
            kind,
            resource_id,
            version = %version,
            "driver_loaded"
        );
        Ok(())
    }

    pub fn unload_driver(&self, id: i64) -> bool {
        let removed = self.loaded.write().remove(&id);
        match removed {
            Some(driver) => {
                driver.lock().plugin.close();
                info!(target: "gw.driver", driver_id = id, "driver_unloaded");
                true
            }
            None => false,
        }
    }

    pub fn reload_driver(&self, driver: &Driver) -> Result<(), DriverError> {
        self.unload_driver(driver.id);
        self.load_driver(driver)
    }

    pub fn is_loaded(&self, id: i64) -> bool {
        self.loaded.read().contains_key(&id)
    }

    pub fn loaded(&self, id: i64) -> Option<SharedDriver> {
        self.loaded.read().get(&id).cloned()
    }

    /// 已加载驱动绑定的资源 id
    pub fn loaded_resource_id(&self, id: i64) -> Option<i64> {
        let driver = self.loaded(id)?;
        let resource_id = driver.lock().resource_id;
        Some(resource_id)
    }

    pub fn list_loaded(&self) -> Vec<LoadedDriverInfo> {
        let drivers: Vec<SharedDriver> = self.loaded.read().values().cloned().collect();
        let mut infos: Vec<LoadedDriverInfo> = drivers
            .iter()
            .map(|driver| {
                let driver = driver.lock();
                LoadedDriverInfo {
                    id: driver.id,
                    name: driver.name.clone(),
                    kind: driver.plugin.kind(),
                    resource_id: driver.resource_id,
                    last_active_ms: driver.last_active_ms,
                    exported_functions: driver.plugin.functions(),
                }
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// 驱动版本：优先使用加载时缓存的值
    pub fn driver_version(&self, id: i64) -> Result<String, DriverError> {
        let driver = self.loaded(id).ok_or(DriverError::NotLoaded(id))?;
        let mut driver = driver.lock();
        if !driver.version.is_empty() {
            return Ok(driver.version.clone());
        }
        let version = driver.plugin.version()?;
        driver.version = version.clone();
        Ok(version)
    }

    pub fn unload_all(&self) {
        let drained: Vec<SharedDriver> = self.loaded.write().drain().map(|(_, d)| d).collect();
        for driver in drained {
            driver.lock().plugin.close();
        }
    }
}

/// 驱动绑定资源：显式字段优先，否则读取配置 JSON 中的 `resource_id`
pub fn parse_driver_resource_id(driver: &Driver) -> i64 {
    if let Some(id) = driver.resource_id.filter(|id| *id > 0) {
        return id;
    }
    let Ok(schema) = serde_json::from_str::<serde_json::Value>(&driver.config_schema) else {
        return 0;
    };
    match schema.get("resource_id") {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(file_path: &str, config_schema: &str) -> Driver {
        Driver {
            id: 7,
            name: "meter".to_string(),
            file_path: file_path.to_string(),
            config_schema: config_schema.to_string(),
            enabled: true,
            ..Driver::default()
        }
    }

    #[test]
    fn resource_id_from_schema() {
        assert_eq!(parse_driver_resource_id(&driver("", r#"{"resource_id":3}"#)), 3);
        assert_eq!(parse_driver_resource_id(&driver("", r#"{"resource_id":"4"}"#)), 4);
        assert_eq!(parse_driver_resource_id(&driver("", "")), 0);
        let mut explicit = driver("", r#"{"resource_id":3}"#);
        explicit.resource_id = Some(9);
        assert_eq!(parse_driver_resource_id(&explicit), 9);
    }

    #[test]
    fn empty_path_falls_back_to_drivers_dir() {
        let manager = DriverManager::new("/opt/drivers").expect("manager");
        assert_eq!(
            manager.resolve_path(&driver("", "")),
            PathBuf::from("/opt/drivers/meter.wasm")
        );
        assert_eq!(
            manager.resolve_path(&driver("/abs/x.wasm", "")),
            PathBuf::from("/abs/x.wasm")
        );
    }

    #[test]
    fn builtin_load_and_unload() {
        let manager = DriverManager::new("drivers").expect("manager");
        manager
            .load_driver(&driver("builtin:modbus_tcp", r#"{"points":[]}"#))
            .expect("load");
        assert!(manager.is_loaded(7));
        assert_eq!(manager.driver_version(7).expect("version"), "1.0.0");
        let listed = manager.list_loaded();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, "native");
        assert_eq!(listed[0].exported_functions, vec!["handle", "write"]);
        assert!(manager.unload_driver(7));
        assert!(!manager.is_loaded(7));
        assert!(matches!(manager.driver_version(7), Err(DriverError::NotLoaded(7))));
    }

    #[test]
    fn missing_files_are_not_found() {
        let manager = DriverManager::new("/nonexistent-drivers").expect("manager");
        let err = manager.load_driver(&driver("", "")).expect_err("missing");
        assert!(matches!(err, DriverError::NotFound(_)));
        let err = manager
            .load_driver(&driver("builtin:bacnet", ""))
            .expect_err("unknown builtin");
        assert!(matches!(err, DriverError::NotFound(_)));
    }

    #[test]
    fn call_timeout_zero_restores_default() {
        let manager = DriverManager::new("drivers").expect("manager");
        manager.set_call_timeout(Duration::from_millis(250));
        assert_eq!(manager.call_timeout(), Duration::from_millis(250));
        manager.set_call_timeout(Duration::ZERO);
        assert_eq!(manager.call_timeout(), DEFAULT_CALL_TIMEOUT);
    }
}
