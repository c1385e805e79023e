//! 设备、资源与驱动定义。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 采集周期下限（毫秒）
pub const MIN_COLLECT_INTERVAL_MS: i64 = 100;
/// 默认采集周期（毫秒）
pub const DEFAULT_COLLECT_INTERVAL_MS: i64 = 5_000;
/// 默认单次调用超时（毫秒）
pub const DEFAULT_DEVICE_TIMEOUT_MS: i64 = 3_000;

/// 现场设备。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub product_key: String,
    #[serde(default)]
    pub device_key: String,
    /// serial / tcp
    #[serde(default)]
    pub driver_type: String,
    #[serde(default)]
    pub serial_port: String,
    #[serde(default)]
    pub baud_rate: u32,
    #[serde(default)]
    pub data_bits: u8,
    #[serde(default)]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub port_num: u16,
    #[serde(default)]
    pub device_address: String,
    pub collect_interval_ms: i64,
    /// 历史存储间隔（秒），0 表示每次采集都写历史
    #[serde(default)]
    pub storage_interval_s: i64,
    pub timeout_ms: i64,
    pub driver_id: Option<i64>,
    pub resource_id: Option<i64>,
    pub enabled: bool,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            description: String::new(),
            product_key: String::new(),
            device_key: String::new(),
            driver_type: "serial".to_string(),
            serial_port: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: "N".to_string(),
            ip_address: String::new(),
            port_num: 0,
            device_address: "1".to_string(),
            collect_interval_ms: DEFAULT_COLLECT_INTERVAL_MS,
            storage_interval_s: 0,
            timeout_ms: DEFAULT_DEVICE_TIMEOUT_MS,
            driver_id: None,
            resource_id: None,
            enabled: true,
        }
    }
}

impl Device {
    /// 实际采集周期：非正数取默认值，小于 100ms 按 100ms。
    pub fn collect_interval(&self) -> Duration {
        let ms = if self.collect_interval_ms <= 0 {
            DEFAULT_COLLECT_INTERVAL_MS
        } else {
            self.collect_interval_ms.max(MIN_COLLECT_INTERVAL_MS)
        };
        Duration::from_millis(ms as u64)
    }

    pub fn call_timeout(&self) -> Duration {
        let ms = if self.timeout_ms <= 0 {
            DEFAULT_DEVICE_TIMEOUT_MS
        } else {
            self.timeout_ms
        };
        Duration::from_millis(ms as u64)
    }

    pub fn storage_interval(&self) -> Duration {
        Duration::from_secs(self.storage_interval_s.max(0) as u64)
    }

    /// 推断资源类型：driver_type 优先，其次看是否配置了网络参数。
    pub fn resource_type(&self) -> ResourceType {
        let driver_type = self.driver_type.trim().to_ascii_lowercase();
        if driver_type.contains("tcp") || driver_type.contains("udp") || driver_type.contains("net")
        {
            return ResourceType::Net;
        }
        if driver_type.contains("serial") || driver_type.contains("rtu") {
            return ResourceType::Serial;
        }
        if !self.ip_address.is_empty() || self.port_num > 0 {
            ResourceType::Net
        } else {
            ResourceType::Serial
        }
    }

    /// 设备自身的网络端点（host:port），无资源绑定时使用。
    pub fn endpoint(&self) -> Option<String> {
        if self.ip_address.trim().is_empty() {
            return None;
        }
        Some(format!("{}:{}", self.ip_address.trim(), self.port_num))
    }
}

/// 资源类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    #[default]
    Serial,
    Net,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Net => "net",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "serial" => Some(Self::Serial),
            "net" | "tcp" => Some(Self::Net),
            _ => None,
        }
    }
}

/// 物理资源（串口节点或 host:port）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub path: String,
    pub enabled: bool,
}

/// 驱动插件定义。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Driver {
    pub id: i64,
    pub name: String,
    /// 插件文件路径；`builtin:<name>` 选择内置驱动
    pub file_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    /// 驱动配置（JSON）
    #[serde(default)]
    pub config_schema: String,
    pub enabled: bool,
    pub resource_id: Option<i64>,
}
