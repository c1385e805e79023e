//! 采集调度能力
//!
//! # 分层
//!
//! - `scheduler`：编排循环、设备轮询任务、命令循环、系统状态循环
//! - `poll`：单设备节奏（周期、资源打开失败退避、历史节流）
//! - `command`：下行写命令的规范化、参数与本地队列
//! - `system`：CPU/内存/磁盘/负载采样
//!
//! # 约束
//!
//! - 同一资源上的调用不重叠（由执行器保证）
//! - 错过的采集周期不补采
//! - 单台设备的失败不影响其它设备

mod command;
mod error;
mod poll;
mod scheduler;
mod system;

pub use command::{
    COMMAND_BATCH, CommandQueue, LOCAL_QUEUE_CAPACITY, LOCAL_SOURCE, command_params,
    normalize_command,
};
pub use error::CollectorError;
pub use poll::{MAX_BACKOFF, OPEN_FAILURE_LIMIT, PollOutcome, PollState, backoff_for, should_store_history};
pub use scheduler::{
    Collector, CollectorDeps, CollectorSettings, DEFAULT_COMMAND_POLL_INTERVAL,
    DEFAULT_DEVICE_SYNC_INTERVAL, DEFAULT_WORKERS, MIN_RUNTIME_INTERVAL, RuntimeIntervals,
};
pub use system::{DEFAULT_SYSTEM_STATS_INTERVAL, SystemStats, SystemStatsSampler};
