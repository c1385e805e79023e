//! 告警日志内存存储实现

use super::lock_failed;
use crate::error::StorageError;
use crate::models::AlarmLogQuery;
use crate::traits::AlarmLogStore;
use domain::AlarmLog;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryAlarmLogStore {
    logs: RwLock<BTreeMap<i64, AlarmLog>>,
}

impl InMemoryAlarmLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AlarmLogStore for InMemoryAlarmLogStore {
    async fn insert_alarm_log(&self, mut log: AlarmLog) -> Result<i64, StorageError> {
        let mut map = self.logs.write().map_err(lock_failed)?;
        log.id = map.keys().next_back().copied().unwrap_or(0) + 1;
        let id = log.id;
        map.insert(id, log);
        Ok(id)
    }

    async fn list_alarm_logs(&self, query: &AlarmLogQuery) -> Result<Vec<AlarmLog>, StorageError> {
        let map = self.logs.read().map_err(lock_failed)?;
        let mut items: Vec<AlarmLog> = map
            .values()
            .filter(|log| query.device_id.is_none_or(|id| log.device_id == id))
            .filter(|log| query.acknowledged.is_none_or(|ack| log.acknowledged == ack))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.triggered_at_ms.cmp(&a.triggered_at_ms).then(b.id.cmp(&a.id)));
        if query.limit > 0 {
            items.truncate(query.limit as usize);
        }
        Ok(items)
    }

    async fn acknowledge_alarm(
        &self,
        id: i64,
        acknowledged_by: &str,
        acknowledged_at_ms: i64,
    ) -> Result<bool, StorageError> {
        let mut map = self.logs.write().map_err(lock_failed)?;
        match map.get_mut(&id) {
            Some(log) => {
                log.acknowledged = true;
                log.acknowledged_by = Some(acknowledged_by.to_string());
                log.acknowledged_at_ms = Some(acknowledged_at_ms);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_alarm_log(&self, id: i64) -> Result<bool, StorageError> {
        let mut map = self.logs.write().map_err(lock_failed)?;
        Ok(map.remove(&id).is_some())
    }

    async fn clear_device_alarms(&self, device_id: i64) -> Result<u64, StorageError> {
        let mut map = self.logs.write().map_err(lock_failed)?;
        let before = map.len();
        map.retain(|_, log| log.device_id != device_id);
        Ok((before - map.len()) as u64)
    }
}
