//! # 数据通路
//!
//! 采集结果进入网关后的全部落点：
//!
//! - `cache`：实时缓存，每个 (设备, 字段) 一条最新值
//! - `buffer`：历史点位内存缓冲，单调 id，批量落盘后删除
//! - `datapath`：写入、落盘、保留期清理与历史查询
//! - `threshold_cache` / `alarm`：阈值缓存、告警去重与出口
//!
//! 两个容量上限（缓存、缓冲）各自节流清理，0 表示不限。

mod alarm;
mod buffer;
mod cache;
mod datapath;
mod error;
mod threshold_cache;
mod throttle;

pub use alarm::{AlarmSink, AlarmState, DEFAULT_REPEAT_INTERVAL, RepeatIntervalResolver};
pub use buffer::HistoryBuffer;
pub use cache::RealtimeCache;
pub use datapath::{DataPath, DataPathSettings, DataPathStores, RetentionOutcome, WriteOutcome};
pub use error::DataPathError;
pub use threshold_cache::{DEFAULT_THRESHOLD_TTL, ThresholdCache};
pub use throttle::CleanupThrottle;

use domain::{SYSTEM_DEVICE_ID, SYSTEM_DEVICE_NAME};

/// 系统设备统一使用规范名。
pub fn canonical_device_name(device_id: i64, device_name: &str) -> String {
    if device_id == SYSTEM_DEVICE_ID {
        SYSTEM_DEVICE_NAME.to_string()
    } else {
        device_name.to_string()
    }
}
