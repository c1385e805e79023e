//! SQLite 网关配置与运行时审计存储实现

use crate::error::StorageError;
use crate::traits::{GatewayConfigStore, RuntimeAuditStore};
use domain::{GatewayConfig, RuntimeConfigAudit};
use sqlx::{Row, SqlitePool};

pub struct SqliteGatewayConfigStore {
    pub pool: SqlitePool,
}

impl SqliteGatewayConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GatewayConfigStore for SqliteGatewayConfigStore {
    async fn get_gateway_config(&self) -> Result<GatewayConfig, StorageError> {
        let row = sqlx::query(
            "SELECT gateway_name, product_key, device_key, data_retention_days, \
             alarm_repeat_interval_seconds FROM gateway_config WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(GatewayConfig::default());
        };
        Ok(GatewayConfig {
            gateway_name: row.try_get("gateway_name")?,
            product_key: row.try_get("product_key")?,
            device_key: row.try_get("device_key")?,
            data_retention_days: row.try_get("data_retention_days")?,
            alarm_repeat_interval_seconds: row.try_get("alarm_repeat_interval_seconds")?,
        })
    }

    async fn update_gateway_config(&self, config: &GatewayConfig) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO gateway_config (id, gateway_name, product_key, device_key, \
             data_retention_days, alarm_repeat_interval_seconds) VALUES (1, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET gateway_name = excluded.gateway_name, \
             product_key = excluded.product_key, device_key = excluded.device_key, \
             data_retention_days = excluded.data_retention_days, \
             alarm_repeat_interval_seconds = excluded.alarm_repeat_interval_seconds",
        )
        .bind(&config.gateway_name)
        .bind(&config.product_key)
        .bind(&config.device_key)
        .bind(config.data_retention_days)
        .bind(config.alarm_repeat_interval_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct SqliteRuntimeAuditStore {
    pub pool: SqlitePool,
}

impl SqliteRuntimeAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RuntimeAuditStore for SqliteRuntimeAuditStore {
    async fn append_audit(&self, audit: RuntimeConfigAudit) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO runtime_config_audits (key, old_value, new_value, changed_by, changed_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&audit.key)
        .bind(&audit.old_value)
        .bind(&audit.new_value)
        .bind(&audit.changed_by)
        .bind(audit.changed_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_audits(&self, limit: i64) -> Result<Vec<RuntimeConfigAudit>, StorageError> {
        let limit = if limit > 0 { limit } else { -1 };
        let rows = sqlx::query(
            "SELECT id, key, old_value, new_value, changed_by, changed_at \
             FROM runtime_config_audits ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut audits = Vec::with_capacity(rows.len());
        for row in rows {
            audits.push(RuntimeConfigAudit {
                id: row.try_get("id")?,
                key: row.try_get("key")?,
                old_value: row.try_get("old_value")?,
                new_value: row.try_get("new_value")?,
                changed_by: row.try_get("changed_by")?,
                changed_at_ms: row.try_get("changed_at")?,
            });
        }
        Ok(audits)
    }
}
