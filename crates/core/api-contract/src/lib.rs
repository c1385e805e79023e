//! 管理接口的统一响应封装与 DTO。

use domain::ThresholdOperator;
use serde::{Deserialize, Serialize};

/// 标准 API 响应封装：`{success, data?, error?, code?}`。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }
}

/// 历史查询参数。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub device_id: Option<i64>,
    pub field_name: Option<String>,
    /// 起始时间（毫秒）
    pub start: Option<i64>,
    /// 结束时间（毫秒）
    pub end: Option<i64>,
    pub limit: Option<i64>,
}

/// 校验后的历史查询条件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub device_id: Option<i64>,
    pub field_name: Option<String>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: i64,
}

pub const DEFAULT_HISTORY_LIMIT: i64 = 1000;
pub const MAX_HISTORY_LIMIT: i64 = 10_000;

impl HistoryQuery {
    /// 非设备条件必须带 device_id，且 start ≤ end。
    pub fn validate(&self) -> Result<HistoryFilter, String> {
        let field_name = self
            .field_name
            .as_ref()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let has_secondary = field_name.is_some() || self.start.is_some() || self.end.is_some();
        if has_secondary && self.device_id.is_none() {
            return Err("device_id is required when filtering by field or time".to_string());
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err("start must not be after end".to_string());
            }
        }
        let limit = match self.limit {
            Some(limit) if limit > 0 => limit.min(MAX_HISTORY_LIMIT),
            _ => DEFAULT_HISTORY_LIMIT,
        };
        Ok(HistoryFilter {
            device_id: self.device_id,
            field_name,
            start_ms: self.start,
            end_ms: self.end,
            limit,
        })
    }
}

/// 实时缓存查询参数。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheQuery {
    pub device_id: Option<i64>,
}

/// 采集器运行时间隔。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorIntervalsDto {
    pub device_sync_interval_ms: u64,
    pub command_poll_interval_ms: u64,
}

/// 采集器状态。
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatusDto {
    pub running: bool,
    pub active_devices: usize,
    pub device_sync_interval_ms: u64,
    pub command_poll_interval_ms: u64,
}

/// 启用/禁用请求。
#[derive(Debug, Clone, Deserialize)]
pub struct EnableRequest {
    pub enabled: bool,
}

/// 告警确认请求。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmAckRequest {
    #[serde(default)]
    pub acknowledged_by: Option<String>,
}

/// 告警列表查询。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmListQuery {
    pub device_id: Option<i64>,
    pub acknowledged: Option<bool>,
    pub limit: Option<i64>,
}

/// 告警重复间隔（秒）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatIntervalDto {
    pub seconds: i64,
}

/// 阈值创建/更新请求。
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdRequest {
    pub device_id: i64,
    pub field_name: String,
    pub operator: String,
    pub value: f64,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub shielded: bool,
    #[serde(default)]
    pub message: String,
}

fn default_severity() -> String {
    "warning".to_string()
}

fn default_true() -> bool {
    true
}

impl ThresholdRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.field_name.trim().is_empty() {
            return Err("field_name is required".to_string());
        }
        if ThresholdOperator::parse(&self.operator).is_none() {
            return Err(format!("unsupported operator: {}", self.operator));
        }
        if !self.value.is_finite() {
            return Err("value must be a finite number".to_string());
        }
        Ok(())
    }
}

/// 网关配置更新请求（字段可选）。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfigUpdate {
    pub gateway_name: Option<String>,
    pub product_key: Option<String>,
    pub device_key: Option<String>,
    pub data_retention_days: Option<i64>,
    pub alarm_repeat_interval_seconds: Option<i64>,
    #[serde(default)]
    pub changed_by: Option<String>,
}

/// 采集器间隔更新请求（毫秒，缺省或 0 保持原值）。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorIntervalsUpdate {
    pub device_sync_interval_ms: Option<u64>,
    pub command_poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub changed_by: Option<String>,
}

/// 本地写命令请求。
#[derive(Debug, Clone, Deserialize)]
pub struct WriteCommandRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub product_key: String,
    pub device_key: String,
    pub field_name: String,
    pub value: String,
}

/// 通用 limit 查询。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

