//! 网关配置与运行时审计的内存存储实现

use super::lock_failed;
use crate::error::StorageError;
use crate::traits::{GatewayConfigStore, RuntimeAuditStore};
use domain::{GatewayConfig, RuntimeConfigAudit};
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryGatewayConfigStore {
    config: RwLock<GatewayConfig>,
}

impl InMemoryGatewayConfigStore {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }
}

#[async_trait::async_trait]
impl GatewayConfigStore for InMemoryGatewayConfigStore {
    async fn get_gateway_config(&self) -> Result<GatewayConfig, StorageError> {
        Ok(self.config.read().map_err(lock_failed)?.clone())
    }

    async fn update_gateway_config(&self, config: &GatewayConfig) -> Result<(), StorageError> {
        *self.config.write().map_err(lock_failed)? = config.clone();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRuntimeAuditStore {
    audits: RwLock<Vec<RuntimeConfigAudit>>,
}

impl InMemoryRuntimeAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RuntimeAuditStore for InMemoryRuntimeAuditStore {
    async fn append_audit(&self, mut audit: RuntimeConfigAudit) -> Result<i64, StorageError> {
        let mut audits = self.audits.write().map_err(lock_failed)?;
        audit.id = audits.len() as i64 + 1;
        let id = audit.id;
        audits.push(audit);
        Ok(id)
    }

    async fn list_audits(&self, limit: i64) -> Result<Vec<RuntimeConfigAudit>, StorageError> {
        let audits = self.audits.read().map_err(lock_failed)?;
        let take = if limit > 0 { limit as usize } else { audits.len() };
        Ok(audits.iter().rev().take(take).cloned().collect())
    }
}
