//! SQLite 历史点位存储实现

use crate::error::StorageError;
use crate::models::PointQuery;
use crate::traits::HistoryStore;
use domain::{DataPoint, ValueType};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

pub struct SqliteHistoryStore {
    pub pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn insert_points(&self, points: &[DataPoint]) -> Result<u64, StorageError> {
        if points.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for point in points {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO data_points \
                 (device_id, device_name, field_name, value, value_type, collected_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(point.device_id)
            .bind(&point.device_name)
            .bind(&point.field_name)
            .bind(&point.value)
            .bind(point.value_type.as_str())
            .bind(point.collected_at_ms)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn query_points(&self, query: &PointQuery) -> Result<Vec<DataPoint>, StorageError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, device_id, device_name, field_name, value, value_type, collected_at \
             FROM data_points WHERE 1 = 1",
        );
        if let Some(device_id) = query.device_id {
            builder.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(field_name) = &query.field_name {
            builder.push(" AND field_name = ").push_bind(field_name.clone());
        }
        if let Some(start) = query.start_ms {
            builder.push(" AND collected_at >= ").push_bind(start);
        }
        if let Some(end) = query.end_ms {
            builder.push(" AND collected_at <= ").push_bind(end);
        }
        builder.push(" ORDER BY collected_at DESC, id DESC");
        if query.limit > 0 {
            builder.push(" LIMIT ").push_bind(query.limit);
        }
        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let value_type: String = row.try_get("value_type")?;
            points.push(DataPoint {
                id: row.try_get("id")?,
                device_id: row.try_get("device_id")?,
                device_name: row.try_get("device_name")?,
                field_name: row.try_get("field_name")?,
                value: row.try_get("value")?,
                value_type: ValueType::parse(&value_type),
                collected_at_ms: row.try_get("collected_at")?,
            });
        }
        Ok(points)
    }

    async fn delete_points_before(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM data_points WHERE collected_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_points(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM data_points")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }
}
