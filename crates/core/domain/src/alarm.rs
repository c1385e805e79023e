//! 阈值与告警。

use serde::{Deserialize, Serialize};

/// 阈值比较运算符。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOperator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl ThresholdOperator {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    pub fn matches(&self, actual: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => actual > threshold,
            Self::Lt => actual < threshold,
            Self::Ge => actual >= threshold,
            Self::Le => actual <= threshold,
            Self::Eq => actual == threshold,
            Self::Ne => actual != threshold,
        }
    }
}

/// 字段阈值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub id: i64,
    pub device_id: i64,
    pub field_name: String,
    pub operator: String,
    pub value: f64,
    #[serde(default)]
    pub severity: String,
    pub enabled: bool,
    /// 屏蔽：仍记录告警日志，但不向北向分发
    #[serde(default)]
    pub shielded: bool,
    #[serde(default)]
    pub message: String,
}

impl Threshold {
    /// 未知运算符视为不命中。
    pub fn matches(&self, actual: f64) -> bool {
        ThresholdOperator::parse(&self.operator)
            .map(|op| op.matches(actual, self.value))
            .unwrap_or(false)
    }
}

/// 告警负载（推送给北向）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub device_id: i64,
    pub device_name: String,
    pub product_key: String,
    pub device_key: String,
    pub field_name: String,
    pub actual_value: f64,
    pub threshold: f64,
    pub operator: String,
    pub severity: String,
    pub message: String,
    pub triggered_at_ms: i64,
}

/// 告警日志记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmLog {
    pub id: i64,
    pub device_id: i64,
    pub threshold_id: Option<i64>,
    pub field_name: String,
    pub actual_value: f64,
    pub threshold_value: f64,
    pub operator: String,
    pub severity: String,
    pub message: String,
    pub triggered_at_ms: i64,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at_ms: Option<i64>,
}
