//! SQLite 阈值存储实现

use crate::error::StorageError;
use crate::traits::ThresholdStore;
use domain::Threshold;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const THRESHOLD_COLUMNS: &str =
    "id, device_id, field_name, operator, value, severity, enabled, shielded, message";

fn threshold_from_row(row: &SqliteRow) -> Result<Threshold, StorageError> {
    Ok(Threshold {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        field_name: row.try_get("field_name")?,
        operator: row.try_get("operator")?,
        value: row.try_get("value")?,
        severity: row.try_get("severity")?,
        enabled: row.try_get("enabled")?,
        shielded: row.try_get("shielded")?,
        message: row.try_get("message")?,
    })
}

pub struct SqliteThresholdStore {
    pub pool: SqlitePool,
}

impl SqliteThresholdStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ThresholdStore for SqliteThresholdStore {
    async fn list_thresholds(&self) -> Result<Vec<Threshold>, StorageError> {
        let rows = sqlx::query(&format!("SELECT {} FROM thresholds ORDER BY id", THRESHOLD_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(threshold_from_row).collect()
    }

    async fn list_device_thresholds(&self, device_id: i64) -> Result<Vec<Threshold>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM thresholds WHERE device_id = ? ORDER BY id",
            THRESHOLD_COLUMNS
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(threshold_from_row).collect()
    }

    async fn get_threshold(&self, id: i64) -> Result<Option<Threshold>, StorageError> {
        let row = sqlx::query(&format!("SELECT {} FROM thresholds WHERE id = ?", THRESHOLD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(threshold_from_row).transpose()
    }

    async fn create_threshold(&self, mut threshold: Threshold) -> Result<Threshold, StorageError> {
        let result = sqlx::query(
            "INSERT INTO thresholds (device_id, field_name, operator, value, severity, enabled, \
             shielded, message) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(threshold.device_id)
        .bind(&threshold.field_name)
        .bind(&threshold.operator)
        .bind(threshold.value)
        .bind(&threshold.severity)
        .bind(threshold.enabled)
        .bind(threshold.shielded)
        .bind(&threshold.message)
        .execute(&self.pool)
        .await?;
        threshold.id = result.last_insert_rowid();
        Ok(threshold)
    }

    async fn update_threshold(&self, threshold: Threshold) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE thresholds SET device_id = ?, field_name = ?, operator = ?, value = ?, \
             severity = ?, enabled = ?, shielded = ?, message = ? WHERE id = ?",
        )
        .bind(threshold.device_id)
        .bind(&threshold.field_name)
        .bind(&threshold.operator)
        .bind(threshold.value)
        .bind(&threshold.severity)
        .bind(threshold.enabled)
        .bind(threshold.shielded)
        .bind(&threshold.message)
        .bind(threshold.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_threshold(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM thresholds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
