//! # SQLite 存储实现模块
//!
//! 参数库（param.db）与历史库（data.db）各自一个连接池。
//!
//! - 参数化 SQL，所有写入走连接池
//! - 历史批量写入使用单事务 + `INSERT OR IGNORE`，重放幂等
//!
//! ## 表
//! - 参数库：`devices`、`resources`、`drivers`、`thresholds`、`alarm_logs`、
//!   `northbound_configs`、`gateway_config`、`runtime_config_audits`
//! - 历史库：`data_points`（UNIQUE(device_id, field_name, collected_at)）

pub mod alarm;
pub mod device;
pub mod gateway;
pub mod history;
pub mod northbound;
pub mod threshold;

pub use alarm::*;
pub use device::*;
pub use gateway::*;
pub use history::*;
pub use northbound::*;
pub use threshold::*;
