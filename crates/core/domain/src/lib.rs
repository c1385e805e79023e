//! 网关共享领域模型。

pub mod alarm;
pub mod data;
pub mod device;
pub mod gateway;
pub mod northbound;

pub use alarm::{AlarmLog, AlarmPayload, Threshold, ThresholdOperator};
pub use data::{CacheEntry, CollectData, DataPoint, ValueType};
pub use device::{Device, Driver, Resource, ResourceType};
pub use gateway::{GatewayConfig, RuntimeConfigAudit, SYSTEM_DEVICE_ID, SYSTEM_DEVICE_NAME};
pub use northbound::{NorthboundCommand, NorthboundCommandResult, NorthboundConfig, NorthboundType};

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
