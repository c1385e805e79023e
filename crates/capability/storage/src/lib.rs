//! # 网关存储模块
//!
//! 参数库与历史库的统一存储抽象。
//!
//! ## 分层
//!
//! 1. **接口层** (`traits.rs`)：各类记录的异步 Trait 接口
//! 2. **查询条件** (`models.rs`)：历史点位、告警日志的过滤条件
//! 3. **错误** (`error.rs`)：统一的 `StorageError`
//! 4. **连接与迁移** (`connection.rs`、`schema.rs`)：SQLite 连接池、编号迁移脚本
//! 5. **实现层**：
//!    - `in_memory/`：内存实现（测试使用）
//!    - `sqlite/`：SQLite 实现（运行时使用）
//!
//! ## 约束
//!
//! - 处理层不直接写 SQL，统一通过 storage 接口
//! - 历史库写入以 (device_id, field_name, collected_at) 去重，重复落盘不产生重复行
//! - 启动时先执行迁移，再构造各 Store

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use connection::*;
pub use error::*;
pub use models::*;
pub use schema::{DATA_MIGRATIONS, Migration, PARAM_MIGRATIONS, run_migrations};
pub use traits::*;

pub use in_memory::{
    InMemoryAlarmLogStore, InMemoryDeviceStore, InMemoryDriverStore, InMemoryGatewayConfigStore,
    InMemoryHistoryStore, InMemoryNorthboundConfigStore, InMemoryResourceStore,
    InMemoryRuntimeAuditStore, InMemoryThresholdStore,
};

pub use sqlite::{
    SqliteAlarmLogStore, SqliteDeviceStore, SqliteDriverStore, SqliteGatewayConfigStore,
    SqliteHistoryStore, SqliteNorthboundConfigStore, SqliteResourceStore, SqliteRuntimeAuditStore,
    SqliteThresholdStore,
};
