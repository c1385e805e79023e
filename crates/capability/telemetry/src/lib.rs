//! 日志初始化、请求 ID 与进程级计数器。

use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsSnapshot {
    pub collections_ok: u64,
    pub collections_failed: u64,
    pub driver_timeouts: u64,
    pub cache_writes: u64,
    pub history_appends: u64,
    pub rows_evicted: u64,
    pub flush_ok: u64,
    pub flush_failed: u64,
    pub rows_flushed: u64,
    pub alarms_emitted: u64,
    pub alarms_suppressed: u64,
    pub northbound_send_ok: u64,
    pub northbound_send_failed: u64,
    pub breaker_rejections: u64,
    pub commands_ok: u64,
    pub commands_failed: u64,
}

/// 网关运行计数器。
pub struct TelemetryMetrics {
    collections_ok: AtomicU64,
    collections_failed: AtomicU64,
    driver_timeouts: AtomicU64,
    cache_writes: AtomicU64,
    history_appends: AtomicU64,
    rows_evicted: AtomicU64,
    flush_ok: AtomicU64,
    flush_failed: AtomicU64,
    rows_flushed: AtomicU64,
    alarms_emitted: AtomicU64,
    alarms_suppressed: AtomicU64,
    northbound_send_ok: AtomicU64,
    northbound_send_failed: AtomicU64,
    breaker_rejections: AtomicU64,
    commands_ok: AtomicU64,
    commands_failed: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            collections_ok: AtomicU64::new(0),
            collections_failed: AtomicU64::new(0),
            driver_timeouts: AtomicU64::new(0),
            cache_writes: AtomicU64::new(0),
            history_appends: AtomicU64::new(0),
            rows_evicted: AtomicU64::new(0),
            flush_ok: AtomicU64::new(0),
            flush_failed: AtomicU64::new(0),
            rows_flushed: AtomicU64::new(0),
            alarms_emitted: AtomicU64::new(0),
            alarms_suppressed: AtomicU64::new(0),
            northbound_send_ok: AtomicU64::new(0),
            northbound_send_failed: AtomicU64::new(0),
            breaker_rejections: AtomicU64::new(0),
            commands_ok: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            collections_ok: self.collections_ok.load(Ordering::Relaxed),
            collections_failed: self.collections_failed.load(Ordering::Relaxed),
            driver_timeouts: self.driver_timeouts.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            history_appends: self.history_appends.load(Ordering::Relaxed),
            rows_evicted: self.rows_evicted.load(Ordering::Relaxed),
            flush_ok: self.flush_ok.load(Ordering::Relaxed),
            flush_failed: self.flush_failed.load(Ordering::Relaxed),
            rows_flushed: self.rows_flushed.load(Ordering::Relaxed),
            alarms_emitted: self.alarms_emitted.load(Ordering::Relaxed),
            alarms_suppressed: self.alarms_suppressed.load(Ordering::Relaxed),
            northbound_send_ok: self.northbound_send_ok.load(Ordering::Relaxed),
            northbound_send_failed: self.northbound_send_failed.load(Ordering::Relaxed),
            breaker_rejections: self.breaker_rejections.load(Ordering::Relaxed),
            commands_ok: self.commands_ok.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing。
///
/// `RUST_LOG` 优先，否则使用 `level`；`json` 为 true 时输出 JSON 行。
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录一次采集结果。
pub fn record_collection(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.collections_ok.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.collections_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录驱动调用超时。
pub fn record_driver_timeout() {
    metrics().driver_timeouts.fetch_add(1, Ordering::Relaxed);
}

/// 记录缓存写入字段数。
pub fn record_cache_writes(count: u64) {
    metrics().cache_writes.fetch_add(count, Ordering::Relaxed);
}

/// 记录历史缓冲追加行数。
pub fn record_history_appends(count: u64) {
    metrics().history_appends.fetch_add(count, Ordering::Relaxed);
}

/// 记录容量淘汰行数。
pub fn record_rows_evicted(count: u64) {
    metrics().rows_evicted.fetch_add(count, Ordering::Relaxed);
}

/// 记录一次落盘（成功时附带行数）。
pub fn record_flush(ok: bool, rows: u64) {
    let metrics = metrics();
    if ok {
        metrics.flush_ok.fetch_add(1, Ordering::Relaxed);
        metrics.rows_flushed.fetch_add(rows, Ordering::Relaxed);
    } else {
        metrics.flush_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录告警产生（屏蔽的告警单独计数）。
pub fn record_alarm(shielded: bool) {
    let metrics = metrics();
    if shielded {
        metrics.alarms_suppressed.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.alarms_emitted.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录北向发送结果。
pub fn record_northbound_send(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.northbound_send_ok.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.northbound_send_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录熔断拒绝。
pub fn record_breaker_rejection() {
    metrics().breaker_rejections.fetch_add(1, Ordering::Relaxed);
}

/// 记录下行命令执行结果。
pub fn record_command(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.commands_ok.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.commands_failed.fetch_add(1, Ordering::Relaxed);
    }
}
