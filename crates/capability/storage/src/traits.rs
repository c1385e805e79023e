//! 存储接口 Trait 定义
//!
//! - 参数库：设备、资源、驱动、阈值、告警日志、北向配置、网关配置、运行时审计
//! - 历史库：历史点位
//!
//! 所有接口返回 StorageError，使用 async_trait 支持动态分发。

use crate::error::StorageError;
use crate::models::{AlarmLogQuery, PointQuery};
use async_trait::async_trait;
use domain::{
    AlarmLog, DataPoint, Device, Driver, GatewayConfig, NorthboundConfig, Resource,
    RuntimeConfigAudit, Threshold,
};

/// 设备存储接口
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 列出全部设备
    async fn list_devices(&self) -> Result<Vec<Device>, StorageError>;

    /// 查找指定设备
    async fn get_device(&self, id: i64) -> Result<Option<Device>, StorageError>;

    /// 按 (product_key, device_key) 查找设备
    async fn find_by_identity(
        &self,
        product_key: &str,
        device_key: &str,
    ) -> Result<Option<Device>, StorageError>;

    /// 创建设备，返回带 id 的记录
    async fn create_device(&self, device: Device) -> Result<Device, StorageError>;

    /// 更新设备
    async fn update_device(&self, device: Device) -> Result<bool, StorageError>;

    /// 删除设备
    async fn delete_device(&self, id: i64) -> Result<bool, StorageError>;
}

/// 资源存储接口
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<Resource>, StorageError>;

    async fn get_resource(&self, id: i64) -> Result<Option<Resource>, StorageError>;

    async fn create_resource(&self, resource: Resource) -> Result<Resource, StorageError>;

    async fn delete_resource(&self, id: i64) -> Result<bool, StorageError>;
}

/// 驱动存储接口
#[async_trait]
pub trait DriverStore: Send + Sync {
    async fn list_drivers(&self) -> Result<Vec<Driver>, StorageError>;

    async fn get_driver(&self, id: i64) -> Result<Option<Driver>, StorageError>;

    async fn create_driver(&self, driver: Driver) -> Result<Driver, StorageError>;

    /// 按 id 覆盖驱动记录
    async fn update_driver(&self, driver: Driver) -> Result<bool, StorageError>;

    async fn delete_driver(&self, id: i64) -> Result<bool, StorageError>;
}

/// 阈值存储接口
#[async_trait]
pub trait ThresholdStore: Send + Sync {
    /// 列出全部阈值
    async fn list_thresholds(&self) -> Result<Vec<Threshold>, StorageError>;

    /// 列出指定设备的阈值
    async fn list_device_thresholds(&self, device_id: i64) -> Result<Vec<Threshold>, StorageError>;

    async fn get_threshold(&self, id: i64) -> Result<Option<Threshold>, StorageError>;

    async fn create_threshold(&self, threshold: Threshold) -> Result<Threshold, StorageError>;

    async fn update_threshold(&self, threshold: Threshold) -> Result<bool, StorageError>;

    async fn delete_threshold(&self, id: i64) -> Result<bool, StorageError>;
}

/// 告警日志存储接口
#[async_trait]
pub trait AlarmLogStore: Send + Sync {
    /// 写入告警日志，返回新 id
    async fn insert_alarm_log(&self, log: AlarmLog) -> Result<i64, StorageError>;

    /// 按条件列出告警（按触发时间倒序）
    async fn list_alarm_logs(&self, query: &AlarmLogQuery) -> Result<Vec<AlarmLog>, StorageError>;

    /// 确认告警
    async fn acknowledge_alarm(
        &self,
        id: i64,
        acknowledged_by: &str,
        acknowledged_at_ms: i64,
    ) -> Result<bool, StorageError>;

    async fn delete_alarm_log(&self, id: i64) -> Result<bool, StorageError>;

    /// 删除设备的全部告警，返回删除数量
    async fn clear_device_alarms(&self, device_id: i64) -> Result<u64, StorageError>;
}

/// 北向配置存储接口
#[async_trait]
pub trait NorthboundConfigStore: Send + Sync {
    async fn list_northbound_configs(&self) -> Result<Vec<NorthboundConfig>, StorageError>;

    async fn get_northbound_config(&self, name: &str)
    -> Result<Option<NorthboundConfig>, StorageError>;

    /// 按名称插入或覆盖
    async fn save_northbound_config(
        &self,
        config: NorthboundConfig,
    ) -> Result<NorthboundConfig, StorageError>;

    async fn set_northbound_enabled(&self, name: &str, enabled: bool) -> Result<bool, StorageError>;

    async fn delete_northbound_config(&self, name: &str) -> Result<bool, StorageError>;
}

/// 网关配置存储接口
#[async_trait]
pub trait GatewayConfigStore: Send + Sync {
    async fn get_gateway_config(&self) -> Result<GatewayConfig, StorageError>;

    async fn update_gateway_config(&self, config: &GatewayConfig) -> Result<(), StorageError>;
}

/// 运行时配置审计存储接口
#[async_trait]
pub trait RuntimeAuditStore: Send + Sync {
    async fn append_audit(&self, audit: RuntimeConfigAudit) -> Result<i64, StorageError>;

    /// 最近的审计记录（倒序）
    async fn list_audits(&self, limit: i64) -> Result<Vec<RuntimeConfigAudit>, StorageError>;
}

/// 历史点位磁盘存储接口
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 单事务批量写入，(device_id, field_name, collected_at) 冲突忽略；返回新增行数
    async fn insert_points(&self, points: &[DataPoint]) -> Result<u64, StorageError>;

    async fn query_points(&self, query: &PointQuery) -> Result<Vec<DataPoint>, StorageError>;

    /// 删除早于 cutoff 的行，返回删除数量
    async fn delete_points_before(&self, cutoff_ms: i64) -> Result<u64, StorageError>;

    async fn count_points(&self) -> Result<u64, StorageError>;
}
