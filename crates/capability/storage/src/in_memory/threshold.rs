//! 阈值内存存储实现

use super::lock_failed;
use crate::error::StorageError;
use crate::traits::ThresholdStore;
use domain::Threshold;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryThresholdStore {
    thresholds: RwLock<BTreeMap<i64, Threshold>>,
}

impl InMemoryThresholdStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ThresholdStore for InMemoryThresholdStore {
    async fn list_thresholds(&self) -> Result<Vec<Threshold>, StorageError> {
        let items = self
            .thresholds
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        Ok(items)
    }

    async fn list_device_thresholds(&self, device_id: i64) -> Result<Vec<Threshold>, StorageError> {
        let items = self
            .thresholds
            .read()
            .map(|map| {
                map.values()
                    .filter(|item| item.device_id == device_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(items)
    }

    async fn get_threshold(&self, id: i64) -> Result<Option<Threshold>, StorageError> {
        Ok(self.thresholds.read().ok().and_then(|map| map.get(&id).cloned()))
    }

    async fn create_threshold(&self, mut threshold: Threshold) -> Result<Threshold, StorageError> {
        let mut map = self.thresholds.write().map_err(lock_failed)?;
        if threshold.id <= 0 {
            threshold.id = map.keys().next_back().copied().unwrap_or(0).max(0) + 1;
        }
        map.insert(threshold.id, threshold.clone());
        Ok(threshold)
    }

    async fn update_threshold(&self, threshold: Threshold) -> Result<bool, StorageError> {
        let mut map = self.thresholds.write().map_err(lock_failed)?;
        match map.get_mut(&threshold.id) {
            Some(existing) => {
                *existing = threshold;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_threshold(&self, id: i64) -> Result<bool, StorageError> {
        let mut map = self.thresholds.write().map_err(lock_failed)?;
        Ok(map.remove(&id).is_some())
    }
}
