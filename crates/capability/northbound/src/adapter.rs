//! 北向适配器抽象与配置解析辅助。

use crate::error::NorthboundError;
use crate::http::HttpAdapter;
use crate::mqtt::MqttAdapter;
use crate::xunji::XunjiAdapter;
use async_trait::async_trait;
use domain::{
    AlarmPayload, CollectData, NorthboundCommand, NorthboundCommandResult, NorthboundType,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// 北向适配器。
///
/// `initialize` 解析适配器私有配置并建立连接；失败时调用方保持该目的地禁用。
#[async_trait]
pub trait NorthboundAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self, config: &Value) -> Result<(), NorthboundError>;

    async fn send(&self, data: &CollectData) -> Result<(), NorthboundError>;

    async fn send_alarm(&self, alarm: &AlarmPayload) -> Result<(), NorthboundError>;

    async fn close(&self) -> Result<(), NorthboundError>;

    /// 拉取待执行的下行命令（不支持下行的适配器返回空）
    async fn pull_commands(&self, _limit: usize) -> Result<Vec<NorthboundCommand>, NorthboundError> {
        Ok(Vec::new())
    }

    async fn report_command_result(
        &self,
        _result: &NorthboundCommandResult,
    ) -> Result<(), NorthboundError> {
        Ok(())
    }
}

/// 按类型创建未初始化的适配器。
pub fn new_adapter(kind: NorthboundType, name: &str) -> Arc<dyn NorthboundAdapter> {
    match kind {
        NorthboundType::Http => Arc::new(HttpAdapter::new(name)),
        NorthboundType::Mqtt => Arc::new(MqttAdapter::new(name)),
        NorthboundType::Xunji => Arc::new(XunjiAdapter::new(name)),
    }
}

/// 配置必须是 JSON 对象；字符串形式的 JSON 也接受。
pub(crate) fn config_object(config: &Value) -> Result<Map<String, Value>, NorthboundError> {
    match config {
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(NorthboundError::InvalidConfig(
                "config must be a JSON object".to_string(),
            )),
        },
        Value::Null => Ok(Map::new()),
        _ => Err(NorthboundError::InvalidConfig(
            "config must be a JSON object".to_string(),
        )),
    }
}

/// 依次取第一个非空字符串（数字等标量会被字符串化）。
pub(crate) fn pick_string(map: &Map<String, Value>, keys: &[&str]) -> String {
    for key in keys {
        let text = match map.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Object(_)) | Some(Value::Array(_)) => continue,
            Some(other) => other.to_string(),
        };
        if !text.is_empty() {
            return text;
        }
    }
    String::new()
}

pub(crate) fn pick_int(map: &Map<String, Value>, fallback: i64, keys: &[&str]) -> i64 {
    for key in keys {
        match map.get(*key) {
            Some(Value::Number(number)) => {
                if let Some(value) = number.as_i64() {
                    return value;
                }
                if let Some(value) = number.as_f64() {
                    return value as i64;
                }
            }
            Some(Value::String(text)) => {
                if let Ok(value) = text.trim().parse::<i64>() {
                    return value;
                }
            }
            _ => {}
        }
    }
    fallback
}

pub(crate) fn pick_bool(map: &Map<String, Value>, fallback: bool, keys: &[&str]) -> bool {
    for key in keys {
        match map.get(*key) {
            Some(Value::Bool(value)) => return *value,
            Some(Value::Number(number)) => return number.as_f64().map(|v| v != 0.0).unwrap_or(false),
            Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => return true,
                "false" | "0" | "no" => return false,
                _ => {}
            },
            _ => {}
        }
    }
    fallback
}

/// 上报时把字段字符串还原为 JSON 标量（bool / 整数 / 浮点 / 原文）。
pub(crate) fn field_json_value(value: &str) -> Value {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(value.to_string())
}

/// `{device_name, timestamp, fields}`，HTTP 与 MQTT 共用的数据上报体。
pub(crate) fn data_body(data: &CollectData) -> Value {
    serde_json::json!({
        "device_name": data.device_name,
        "timestamp": data.timestamp_ms,
        "fields": data.fields,
    })
}
