//! 历史点位内存存储实现（模拟磁盘唯一约束）

use super::lock_failed;
use crate::error::StorageError;
use crate::models::PointQuery;
use crate::traits::HistoryStore;
use domain::DataPoint;
use std::collections::BTreeMap;
use std::sync::RwLock;

type PointKey = (i64, String, i64);

#[derive(Default)]
pub struct InMemoryHistoryStore {
    points: RwLock<BTreeMap<PointKey, DataPoint>>,
    fail_writes: RwLock<bool>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续写入失败（测试落盘失败路径）
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.write() {
            *flag = fail;
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn insert_points(&self, points: &[DataPoint]) -> Result<u64, StorageError> {
        if self.fail_writes.read().map(|flag| *flag).unwrap_or(false) {
            return Err(StorageError::new("history store unavailable"));
        }
        let mut map = self.points.write().map_err(lock_failed)?;
        let mut inserted = 0;
        for point in points {
            let key = (point.device_id, point.field_name.clone(), point.collected_at_ms);
            if map.contains_key(&key) {
                continue;
            }
            map.insert(key, point.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn query_points(&self, query: &PointQuery) -> Result<Vec<DataPoint>, StorageError> {
        let map = self.points.read().map_err(lock_failed)?;
        let mut items: Vec<DataPoint> = map
            .values()
            .filter(|p| query.matches(p.device_id, &p.field_name, p.collected_at_ms))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.collected_at_ms.cmp(&a.collected_at_ms));
        if query.limit > 0 {
            items.truncate(query.limit as usize);
        }
        Ok(items)
    }

    async fn delete_points_before(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        let mut map = self.points.write().map_err(lock_failed)?;
        let before = map.len();
        map.retain(|_, point| point.collected_at_ms >= cutoff_ms);
        Ok((before - map.len()) as u64)
    }

    async fn count_points(&self) -> Result<u64, StorageError> {
        Ok(self.points.read().map_err(lock_failed)?.len() as u64)
    }
}
