//! 存储查询条件。

/// 历史点位查询条件。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointQuery {
    pub device_id: Option<i64>,
    pub field_name: Option<String>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: i64,
}

impl PointQuery {
    pub fn matches(&self, device_id: i64, field_name: &str, collected_at_ms: i64) -> bool {
        if let Some(id) = self.device_id {
            if id != device_id {
                return false;
            }
        }
        if let Some(field) = &self.field_name {
            if field != field_name {
                return false;
            }
        }
        if let Some(start) = self.start_ms {
            if collected_at_ms < start {
                return false;
            }
        }
        if let Some(end) = self.end_ms {
            if collected_at_ms > end {
                return false;
            }
        }
        true
    }
}

/// 告警日志查询条件。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmLogQuery {
    pub device_id: Option<i64>,
    pub acknowledged: Option<bool>,
    pub limit: i64,
}
