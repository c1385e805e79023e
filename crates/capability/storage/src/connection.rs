//! 数据库连接管理
//!
//! SQLite 单文件数据库，连接池上限由 DB_MAX_OPEN_CONNS / DB_MAX_IDLE_CONNS 控制。

use crate::error::StorageError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::time::Duration;

/// 连接池参数。
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_open: u32,
    pub max_idle: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: 25,
            max_idle: 10,
        }
    }
}

/// 打开（必要时创建）SQLite 文件并建立连接池。
pub async fn connect_sqlite(path: &str, settings: PoolSettings) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let max_open = settings.max_open.max(1);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_open)
        .min_connections(settings.max_idle.min(max_open))
        .connect_with(options)
        .await?;
    Ok(pool)
}
