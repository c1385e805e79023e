//! 北向配置内存存储实现

use super::lock_failed;
use crate::error::StorageError;
use crate::traits::NorthboundConfigStore;
use domain::NorthboundConfig;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// 以名称为键。
#[derive(Default)]
pub struct InMemoryNorthboundConfigStore {
    configs: RwLock<BTreeMap<String, NorthboundConfig>>,
}

impl InMemoryNorthboundConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl NorthboundConfigStore for InMemoryNorthboundConfigStore {
    async fn list_northbound_configs(&self) -> Result<Vec<NorthboundConfig>, StorageError> {
        let items = self
            .configs
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        Ok(items)
    }

    async fn get_northbound_config(
        &self,
        name: &str,
    ) -> Result<Option<NorthboundConfig>, StorageError> {
        Ok(self.configs.read().ok().and_then(|map| map.get(name).cloned()))
    }

    async fn save_northbound_config(
        &self,
        mut config: NorthboundConfig,
    ) -> Result<NorthboundConfig, StorageError> {
        if config.name.trim().is_empty() {
            return Err(StorageError::new("northbound name is required"));
        }
        let mut map = self.configs.write().map_err(lock_failed)?;
        if let Some(existing) = map.get(&config.name) {
            config.id = existing.id;
        } else if config.id <= 0 {
            config.id = map.values().map(|item| item.id).max().unwrap_or(0) + 1;
        }
        map.insert(config.name.clone(), config.clone());
        Ok(config)
    }

    async fn set_northbound_enabled(&self, name: &str, enabled: bool) -> Result<bool, StorageError> {
        let mut map = self.configs.write().map_err(lock_failed)?;
        match map.get_mut(name) {
            Some(config) => {
                config.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_northbound_config(&self, name: &str) -> Result<bool, StorageError> {
        let mut map = self.configs.write().map_err(lock_failed)?;
        Ok(map.remove(name).is_some())
    }
}
