//! SQLite 北向配置存储实现

use crate::error::StorageError;
use crate::traits::NorthboundConfigStore;
use domain::{NorthboundConfig, NorthboundType};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

fn northbound_from_row(row: &SqliteRow) -> Result<NorthboundConfig, StorageError> {
    let kind: String = row.try_get("type")?;
    let kind = NorthboundType::parse(&kind)
        .ok_or_else(|| StorageError::new(format!("unknown northbound type: {}", kind)))?;
    let config: String = row.try_get("config")?;
    let config = if config.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(&config)?
    };
    Ok(NorthboundConfig {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind,
        enabled: row.try_get("enabled")?,
        upload_interval_ms: row.try_get("upload_interval")?,
        config,
    })
}

pub struct SqliteNorthboundConfigStore {
    pub pool: SqlitePool,
}

impl SqliteNorthboundConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NorthboundConfigStore for SqliteNorthboundConfigStore {
    async fn list_northbound_configs(&self) -> Result<Vec<NorthboundConfig>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, name, type, enabled, upload_interval, config FROM northbound_configs \
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(northbound_from_row).collect()
    }

    async fn get_northbound_config(
        &self,
        name: &str,
    ) -> Result<Option<NorthboundConfig>, StorageError> {
        let row = sqlx::query(
            "SELECT id, name, type, enabled, upload_interval, config FROM northbound_configs \
             WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(northbound_from_row).transpose()
    }

    async fn save_northbound_config(
        &self,
        config: NorthboundConfig,
    ) -> Result<NorthboundConfig, StorageError> {
        if config.name.trim().is_empty() {
            return Err(StorageError::new("northbound name is required"));
        }
        let payload = serde_json::to_string(&config.config)?;
        sqlx::query(
            "INSERT INTO northbound_configs (name, type, enabled, upload_interval, config) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET type = excluded.type, enabled = excluded.enabled, \
             upload_interval = excluded.upload_interval, config = excluded.config",
        )
        .bind(&config.name)
        .bind(config.kind.as_str())
        .bind(config.enabled)
        .bind(config.upload_interval_ms)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        self.get_northbound_config(&config.name)
            .await?
            .ok_or_else(|| StorageError::new("northbound config vanished after save"))
    }

    async fn set_northbound_enabled(&self, name: &str, enabled: bool) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE northbound_configs SET enabled = ? WHERE name = ?")
            .bind(enabled)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_northbound_config(&self, name: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM northbound_configs WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
