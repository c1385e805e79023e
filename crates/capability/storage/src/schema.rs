//! 编号迁移脚本
//!
//! 启动时按编号顺序执行，已执行的版本记录在 `schema_migrations`。

use crate::error::StorageError;
use sqlx::{Row, SqlitePool};
use tracing::info;

/// 单个迁移脚本。
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// 参数库迁移。
pub const PARAM_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init",
        sql: include_str!("../migrations/param/0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "runtime_audit",
        sql: include_str!("../migrations/param/0002_runtime_audit.sql"),
    },
];

/// 历史库迁移。
pub const DATA_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "init",
    sql: include_str!("../migrations/data/0001_init.sql"),
}];

/// 执行尚未应用的迁移，返回本次应用的数量。
pub async fn run_migrations(
    pool: &SqlitePool,
    migrations: &[Migration],
) -> Result<usize, StorageError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
            version INTEGER PRIMARY KEY, \
            name TEXT NOT NULL, \
            applied_at INTEGER NOT NULL)",
    )
    .execute(pool)
    .await?;

    let rows = sqlx::query("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied = Vec::with_capacity(rows.len());
    for row in rows {
        applied.push(row.try_get::<i64, _>("version")?);
    }

    let mut count = 0;
    for migration in migrations {
        if applied.contains(&migration.version) {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                StorageError::new(format!(
                    "migration {:04}_{} failed: {}",
                    migration.version, migration.name, err
                ))
            })?;
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(domain::now_epoch_ms())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(
            target: "gw.storage",
            version = migration.version,
            name = migration.name,
            "migration_applied"
        );
        count += 1;
    }
    Ok(count)
}
