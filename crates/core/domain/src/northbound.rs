//! 北向配置与下行命令。

use serde::{Deserialize, Serialize};

/// 北向适配器类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NorthboundType {
    Http,
    Mqtt,
    Xunji,
}

impl NorthboundType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Some(Self::Http),
            "mqtt" => Some(Self::Mqtt),
            "xunji" => Some(Self::Xunji),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Mqtt => "mqtt",
            Self::Xunji => "xunji",
        }
    }
}

/// 北向目的地配置。
///
/// `config` 为适配器私有的 JSON 对象，由适配器 `initialize` 解析。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NorthboundConfig {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NorthboundType,
    pub enabled: bool,
    pub upload_interval_ms: i64,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// 北向下行命令（属性设置）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NorthboundCommand {
    pub request_id: String,
    pub product_key: String,
    pub device_key: String,
    pub field_name: String,
    pub value: String,
    pub source: String,
}

/// 下行命令执行结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NorthboundCommandResult {
    pub request_id: String,
    pub product_key: String,
    pub device_key: String,
    pub field_name: String,
    pub value: String,
    pub source: String,
    pub success: bool,
    pub code: i32,
    pub message: String,
}

impl NorthboundCommandResult {
    pub fn from_command(command: &NorthboundCommand, outcome: Result<(), String>) -> Self {
        let (success, code, message) = match outcome {
            Ok(()) => (true, 200, "success".to_string()),
            Err(message) => (false, 500, message),
        };
        Self {
            request_id: command.request_id.clone(),
            product_key: command.product_key.clone(),
            device_key: command.device_key.clone(),
            field_name: command.field_name.clone(),
            value: command.value.clone(),
            source: command.source.clone(),
            success,
            code,
            message,
        }
    }
}
