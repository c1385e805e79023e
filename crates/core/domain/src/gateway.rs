//! 网关级配置。

use serde::{Deserialize, Serialize};

/// 系统状态使用的保留设备 ID。
pub const SYSTEM_DEVICE_ID: i64 = -1;
/// 系统状态的规范设备名。
pub const SYSTEM_DEVICE_NAME: &str = "__system__";

/// 网关配置（单行）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub gateway_name: String,
    pub product_key: String,
    pub device_key: String,
    pub data_retention_days: i64,
    pub alarm_repeat_interval_seconds: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_name: "edge-gateway".to_string(),
            product_key: String::new(),
            device_key: String::new(),
            data_retention_days: 30,
            alarm_repeat_interval_seconds: 60,
        }
    }
}

impl GatewayConfig {
    pub fn retention_days(&self) -> i64 {
        if self.data_retention_days <= 0 {
            30
        } else {
            self.data_retention_days
        }
    }
}

/// 运行时配置变更审计。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfigAudit {
    pub id: i64,
    pub key: String,
    pub old_value: String,
    pub new_value: String,
    pub changed_by: String,
    pub changed_at_ms: i64,
}
