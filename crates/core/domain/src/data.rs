//! 采集数据、实时缓存与历史点位。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单个设备一次采集的字段快照。
///
/// `fields` 为字段名到字符串化取值的映射，键保证非空。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectData {
    pub device_id: i64,
    pub device_name: String,
    #[serde(default)]
    pub product_key: String,
    #[serde(default)]
    pub device_key: String,
    /// 驱动读取时间（毫秒）
    pub timestamp_ms: i64,
    pub fields: BTreeMap<String, String>,
}

impl CollectData {
    pub fn new(device_id: i64, device_name: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            timestamp_ms,
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.fields.insert(name, value.into());
        }
        self
    }
}

/// 字段取值类型（由字符串推断）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Float,
    Bool,
    #[default]
    String,
}

impl ValueType {
    pub fn infer(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Self::String;
        }
        if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool;
        }
        if trimmed.parse::<i64>().is_ok() {
            return Self::Int;
        }
        if trimmed.parse::<f64>().map(|v| v.is_finite()).unwrap_or(false) {
            return Self::Float;
        }
        Self::String
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::String => "string",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            _ => Self::String,
        }
    }
}

/// 实时缓存条目，(device_id, field_name) 唯一。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub device_id: i64,
    pub device_name: String,
    pub field_name: String,
    pub value: String,
    pub value_type: ValueType,
    pub collected_at_ms: i64,
}

/// 历史点位。
///
/// `id` 为内存缓冲分配的单调序号，落盘后以 (device_id, field_name, collected_at_ms) 去重。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: i64,
    pub device_id: i64,
    pub device_name: String,
    pub field_name: String,
    pub value: String,
    pub value_type: ValueType,
    pub collected_at_ms: i64,
}
