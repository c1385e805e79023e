//! 内存存储实现模块
//!
//! 用于单元测试与集成测试，使用 RwLock + BTreeMap 提供线程安全的存储。
//!
//! - DeviceStore / ResourceStore / DriverStore: InMemoryDeviceStore 等
//! - ThresholdStore: InMemoryThresholdStore
//! - AlarmLogStore: InMemoryAlarmLogStore
//! - NorthboundConfigStore: InMemoryNorthboundConfigStore
//! - GatewayConfigStore / RuntimeAuditStore: InMemoryGatewayConfigStore、InMemoryRuntimeAuditStore
//! - HistoryStore: InMemoryHistoryStore

pub mod alarm;
pub mod device;
pub mod gateway;
pub mod history;
pub mod northbound;
pub mod threshold;

pub use alarm::*;
pub use device::*;
pub use gateway::*;
pub use history::*;
pub use northbound::*;
pub use threshold::*;

use crate::error::StorageError;

fn lock_failed<T>(_: T) -> StorageError {
    StorageError::new("lock failed")
}
