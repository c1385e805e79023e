//! 驱动执行能力
//!
//! # 分层
//!
//! - `executor`：设备调用入口（资源互斥、超时、重试、结果映射）
//! - `manager`：按驱动 id 维护已加载插件，懒加载与版本查询
//! - `plugin` / `wasm` / `builtin`：插件能力集、WASM 沙箱、内置 Modbus 驱动
//! - `host`：插件可见的串口/TCP 宿主 I/O
//! - `modbus` / `result`：帧工具与输出信封解析
//!
//! # 约束
//!
//! - 同一资源上的驱动调用严格串行
//! - 插件超时后实例仍可继续使用

pub mod builtin;
pub mod error;
pub mod executor;
pub mod host;
pub mod manager;
pub mod modbus;
pub mod plugin;
pub mod result;
pub mod types;
pub mod wasm;

pub use builtin::{BUILTIN_PREFIX, BuiltinFactory, ModbusDriver, ModbusTransport};
pub use error::DriverError;
pub use executor::{DriverExecutor, ExecutorSettings, ResourceKey};
pub use host::{HostIo, ResourceHandle};
pub use manager::{DEFAULT_CALL_TIMEOUT, DriverManager, LoadedDriver, parse_driver_resource_id};
pub use plugin::{CallControl, NativeDriver, Plugin};
pub use result::{format_driver_value, map_result_fields, parse_output};
pub use types::{
    DEFAULT_FUNCTION, DriverContext, DriverPoint, DriverResult, LoadedDriverInfo, PluginOutput,
    WRITE_FUNCTION,
};
pub use wasm::{WasmPlugin, WasmRuntime};
