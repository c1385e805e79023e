//! SQLite 告警日志存储实现

use crate::error::StorageError;
use crate::models::AlarmLogQuery;
use crate::traits::AlarmLogStore;
use domain::AlarmLog;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

fn alarm_from_row(row: &SqliteRow) -> Result<AlarmLog, StorageError> {
    Ok(AlarmLog {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        threshold_id: row.try_get("threshold_id")?,
        field_name: row.try_get("field_name")?,
        actual_value: row.try_get("actual_value")?,
        threshold_value: row.try_get("threshold_value")?,
        operator: row.try_get("operator")?,
        severity: row.try_get("severity")?,
        message: row.try_get("message")?,
        triggered_at_ms: row.try_get("triggered_at")?,
        acknowledged: row.try_get("acknowledged")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        acknowledged_at_ms: row.try_get("acknowledged_at")?,
    })
}

pub struct SqliteAlarmLogStore {
    pub pool: SqlitePool,
}

impl SqliteAlarmLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AlarmLogStore for SqliteAlarmLogStore {
    async fn insert_alarm_log(&self, log: AlarmLog) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO alarm_logs (device_id, threshold_id, field_name, actual_value, \
             threshold_value, operator, severity, message, triggered_at, acknowledged) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(log.device_id)
        .bind(log.threshold_id)
        .bind(&log.field_name)
        .bind(log.actual_value)
        .bind(log.threshold_value)
        .bind(&log.operator)
        .bind(&log.severity)
        .bind(&log.message)
        .bind(log.triggered_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_alarm_logs(&self, query: &AlarmLogQuery) -> Result<Vec<AlarmLog>, StorageError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, device_id, threshold_id, field_name, actual_value, threshold_value, \
             operator, severity, message, triggered_at, acknowledged, acknowledged_by, \
             acknowledged_at FROM alarm_logs WHERE 1 = 1",
        );
        if let Some(device_id) = query.device_id {
            builder.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(acknowledged) = query.acknowledged {
            builder.push(" AND acknowledged = ").push_bind(acknowledged);
        }
        builder.push(" ORDER BY triggered_at DESC, id DESC");
        if query.limit > 0 {
            builder.push(" LIMIT ").push_bind(query.limit);
        }
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(alarm_from_row).collect()
    }

    async fn acknowledge_alarm(
        &self,
        id: i64,
        acknowledged_by: &str,
        acknowledged_at_ms: i64,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE alarm_logs SET acknowledged = 1, acknowledged_by = ?, acknowledged_at = ? \
             WHERE id = ?",
        )
        .bind(acknowledged_by)
        .bind(acknowledged_at_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_alarm_log(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM alarm_logs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_device_alarms(&self, device_id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM alarm_logs WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
