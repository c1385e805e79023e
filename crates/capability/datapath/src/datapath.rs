use crate::alarm::{AlarmSink, AlarmState, RepeatIntervalResolver};
use crate::buffer::HistoryBuffer;
use crate::cache::RealtimeCache;
use crate::error::DataPathError;
use crate::threshold_cache::ThresholdCache;
use crate::throttle::CleanupThrottle;
use domain::{
    AlarmLog, AlarmPayload, CacheEntry, CollectData, DataPoint, Threshold, now_epoch_ms,
};
use gw_storage::{AlarmLogStore, GatewayConfigStore, HistoryStore, PointQuery};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DAY_MS: i64 = 86_400_000;

/// 数据通路参数；容量为 0 表示不限。
#[derive(Debug, Clone)]
pub struct DataPathSettings {
    pub max_data_cache: usize,
    pub max_data_points: usize,
    pub sync_interval: Duration,
    /// 缓冲行数达到该值时异步落盘，0 表示只按周期落盘
    pub sync_batch_trigger: usize,
    pub retention_interval: Duration,
    pub cleanup_every: u64,
    pub cleanup_min_interval: Duration,
}

impl Default for DataPathSettings {
    fn default() -> Self {
        Self {
            max_data_cache: 10_000,
            max_data_points: 100_000,
            sync_interval: Duration::from_secs(300),
            sync_batch_trigger: 1000,
            retention_interval: Duration::from_secs(6 * 3600),
            cleanup_every: 100,
            cleanup_min_interval: Duration::from_secs(5),
        }
    }
}

/// 数据通路依赖的存储。
#[derive(Clone)]
pub struct DataPathStores {
    pub history: Arc<dyn HistoryStore>,
    pub alarm_logs: Arc<dyn AlarmLogStore>,
    pub gateway: Arc<dyn GatewayConfigStore>,
}

/// 一次写入的结果统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub cached: u64,
    pub appended: u64,
    pub alarms: usize,
}

/// 一次保留期清理的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub cutoff_ms: i64,
    pub memory_rows: u64,
    pub disk_rows: u64,
}

struct LoopTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LoopTask {
    async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

struct DataPathInner {
    settings: DataPathSettings,
    cache: RealtimeCache,
    buffer: HistoryBuffer,
    stores: DataPathStores,
    thresholds: ThresholdCache,
    alarm_state: AlarmState,
    repeat: RepeatIntervalResolver,
    sink: RwLock<Option<Arc<dyn AlarmSink>>>,
    flush_lock: tokio::sync::Mutex<()>,
    flush_in_flight: AtomicBool,
    sync_task: tokio::sync::Mutex<Option<LoopTask>>,
    retention_task: tokio::sync::Mutex<Option<LoopTask>>,
}

/// 双存储数据通路：实时缓存 + 历史缓冲/磁盘，写入时评估阈值。
#[derive(Clone)]
pub struct DataPath {
    inner: Arc<DataPathInner>,
}

impl DataPath {
    pub fn new(stores: DataPathStores, thresholds: ThresholdCache, settings: DataPathSettings) -> Self {
        let throttle = || CleanupThrottle::new(settings.cleanup_every, settings.cleanup_min_interval);
        let repeat = RepeatIntervalResolver::new(stores.gateway.clone());
        Self {
            inner: Arc::new(DataPathInner {
                cache: RealtimeCache::new(settings.max_data_cache, throttle()),
                buffer: HistoryBuffer::new(settings.max_data_points, throttle()),
                stores,
                thresholds,
                alarm_state: AlarmState::new(),
                repeat,
                sink: RwLock::new(None),
                flush_lock: tokio::sync::Mutex::new(()),
                flush_in_flight: AtomicBool::new(false),
                sync_task: tokio::sync::Mutex::new(None),
                retention_task: tokio::sync::Mutex::new(None),
                settings,
            }),
        }
    }

    pub fn set_alarm_sink(&self, sink: Arc<dyn AlarmSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    pub fn settings(&self) -> &DataPathSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &RealtimeCache {
        &self.inner.cache
    }

    pub fn buffer(&self) -> &HistoryBuffer {
        &self.inner.buffer
    }

    pub fn thresholds(&self) -> &ThresholdCache {
        &self.inner.thresholds
    }

    pub fn alarm_state(&self) -> &AlarmState {
        &self.inner.alarm_state
    }

    /// 网关告警重复间隔修改后调用。
    pub fn invalidate_repeat_interval(&self) {
        self.inner.repeat.invalidate();
    }

    pub async fn repeat_interval(&self) -> Duration {
        self.inner.repeat.resolve().await
    }

    /// 写入一次采集：覆盖缓存、按需追加历史、节流清理、评估阈值。
    pub async fn write(&self, data: &CollectData, store_history: bool) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        if data.fields.is_empty() {
            return outcome;
        }

        outcome.cached = self.inner.cache.upsert(data);
        gw_telemetry::record_cache_writes(outcome.cached);
        let mut evicted = self.inner.cache.maybe_cleanup();

        if store_history {
            outcome.appended = self.inner.buffer.append(data);
            gw_telemetry::record_history_appends(outcome.appended);
            evicted += self.inner.buffer.maybe_cleanup();
        }
        if evicted > 0 {
            gw_telemetry::record_rows_evicted(evicted);
            debug!(target: "gw.datapath", rows = evicted, "capacity_evicted");
        }

        let trigger = self.inner.settings.sync_batch_trigger;
        if store_history && trigger > 0 && self.inner.buffer.len() >= trigger {
            self.trigger_flush();
        }

        outcome.alarms = self.evaluate_alarms(data).await;
        outcome
    }

    /// 异步触发一次落盘；已有落盘进行中时忽略。
    pub fn trigger_flush(&self) {
        if self.inner.flush_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let path = self.clone();
        tokio::spawn(async move {
            let _ = path.flush().await;
            path.inner.flush_in_flight.store(false, Ordering::Release);
        });
    }

    /// 将缓冲快照写入磁盘，提交后删除 id ≤ max_id 的行；返回新增行数。
    ///
    /// 失败时缓冲保持不变，下一次落盘重试。
    pub async fn flush(&self) -> Result<u64, DataPathError> {
        let _guard = self.inner.flush_lock.lock().await;
        let Some((max_id, rows)) = self.inner.buffer.snapshot() else {
            return Ok(0);
        };
        match self.inner.stores.history.insert_points(&rows).await {
            Ok(inserted) => {
                let removed = self.inner.buffer.remove_upto(max_id);
                gw_telemetry::record_flush(true, inserted);
                info!(
                    target: "gw.datapath",
                    max_id,
                    rows = removed,
                    inserted,
                    "history_flushed"
                );
                Ok(inserted)
            }
            Err(err) => {
                gw_telemetry::record_flush(false, 0);
                warn!(
                    target: "gw.datapath",
                    max_id,
                    rows = rows.len(),
                    error = %err,
                    "history_flush_failed"
                );
                Err(err.into())
            }
        }
    }

    /// 按网关保留天数删除内存与磁盘中的过期点位。
    pub async fn run_retention(&self) -> Result<RetentionOutcome, DataPathError> {
        let days = match self.inner.stores.gateway.get_gateway_config().await {
            Ok(config) => config.retention_days(),
            Err(err) => {
                warn!(target: "gw.datapath", error = %err, "retention_config_load_failed");
                domain::GatewayConfig::default().retention_days()
            }
        };
        let cutoff_ms = now_epoch_ms() - days * DAY_MS;
        let memory_rows = self.inner.buffer.remove_before(cutoff_ms) as u64;
        let disk_rows = self
            .inner
            .stores
            .history
            .delete_points_before(cutoff_ms)
            .await?;
        info!(
            target: "gw.datapath",
            retention_days = days,
            memory_rows,
            disk_rows,
            "retention_cleaned"
        );
        Ok(RetentionOutcome {
            cutoff_ms,
            memory_rows,
            disk_rows,
        })
    }

    /// 启动周期落盘与保留期清理。
    pub async fn start(&self) {
        self.start_sync().await;
        self.start_retention().await;
    }

    pub async fn start_sync(&self) {
        let mut task = self.inner.sync_task.lock().await;
        if task.is_some() {
            return;
        }
        let path = self.clone();
        *task = Some(spawn_loop(self.inner.settings.sync_interval, move || {
            let path = path.clone();
            async move {
                let _ = path.flush().await;
            }
        }));
        info!(
            target: "gw.datapath",
            interval_ms = self.inner.settings.sync_interval.as_millis() as u64,
            "history_sync_started"
        );
    }

    pub async fn stop_sync(&self) {
        if let Some(task) = self.inner.sync_task.lock().await.take() {
            task.shutdown().await;
            info!(target: "gw.datapath", "history_sync_stopped");
        }
    }

    pub async fn start_retention(&self) {
        let mut task = self.inner.retention_task.lock().await;
        if task.is_some() {
            return;
        }
        let path = self.clone();
        *task = Some(spawn_loop(self.inner.settings.retention_interval, move || {
            let path = path.clone();
            async move {
                if let Err(err) = path.run_retention().await {
                    warn!(target: "gw.datapath", error = %err, "retention_failed");
                }
            }
        }));
        info!(target: "gw.datapath", "retention_started");
    }

    pub async fn stop_retention(&self) {
        if let Some(task) = self.inner.retention_task.lock().await.take() {
            task.shutdown().await;
            info!(target: "gw.datapath", "retention_stopped");
        }
    }

    pub async fn is_syncing(&self) -> bool {
        self.inner.sync_task.lock().await.is_some()
    }

    /// 最新值；未指定设备时返回全部用户设备（不含系统设备）。
    pub fn latest(&self, device_id: Option<i64>) -> Vec<CacheEntry> {
        match device_id {
            Some(id) => self.inner.cache.device_entries(id),
            None => self.inner.cache.list(false),
        }
    }

    pub fn latest_value(&self, device_id: i64, field_name: &str) -> Option<CacheEntry> {
        self.inner.cache.get(device_id, field_name)
    }

    /// 合并磁盘与内存缓冲的历史点位，按时间倒序。
    pub async fn query_history(&self, query: &PointQuery) -> Result<Vec<DataPoint>, DataPathError> {
        if let (Some(start), Some(end)) = (query.start_ms, query.end_ms) {
            if start > end {
                return Err(DataPathError::InvalidQuery(
                    "start must not be after end".to_string(),
                ));
            }
        }
        let memory = self.inner.buffer.query(query);
        let disk = self.inner.stores.history.query_points(query).await?;
        let mut seen: HashSet<(i64, String, i64)> = HashSet::new();
        let mut merged = Vec::with_capacity(memory.len() + disk.len());
        for point in memory.into_iter().chain(disk) {
            if seen.insert((point.device_id, point.field_name.clone(), point.collected_at_ms)) {
                merged.push(point);
            }
        }
        merged.sort_by(|a, b| b.collected_at_ms.cmp(&a.collected_at_ms));
        if query.limit > 0 {
            merged.truncate(query.limit as usize);
        }
        Ok(merged)
    }

    /// 设备删除后清理缓存、缓冲、告警状态与阈值缓存。
    pub fn remove_device(&self, device_id: i64) {
        let cached = self.inner.cache.remove_device(device_id);
        let buffered = self.inner.buffer.remove_device(device_id);
        self.inner.alarm_state.clear_device(device_id);
        self.inner.thresholds.invalidate_device(device_id);
        info!(target: "gw.datapath", device_id, cached, buffered, "device_data_removed");
    }

    async fn evaluate_alarms(&self, data: &CollectData) -> usize {
        let thresholds = match self.inner.thresholds.device_thresholds(data.device_id).await {
            Ok(items) => items,
            Err(err) => {
                warn!(
                    target: "gw.datapath",
                    device_id = data.device_id,
                    error = %err,
                    "threshold_load_failed"
                );
                return 0;
            }
        };
        if thresholds.iter().all(|threshold| !threshold.enabled) {
            return 0;
        }
        let repeat = self.inner.repeat.resolve().await;
        let mut emitted = 0;
        for threshold in thresholds.iter().filter(|threshold| threshold.enabled) {
            let Some(actual) = numeric_field(&data.fields, &threshold.field_name) else {
                continue;
            };
            let matched = threshold.matches(actual);
            if !self
                .inner
                .alarm_state
                .should_emit(data.device_id, threshold, matched, repeat)
            {
                continue;
            }
            self.raise_alarm(data, threshold, actual).await;
            emitted += 1;
        }
        emitted
    }

    async fn raise_alarm(&self, data: &CollectData, threshold: &Threshold, actual: f64) {
        let triggered_at_ms = now_epoch_ms();
        let log = AlarmLog {
            id: 0,
            device_id: data.device_id,
            threshold_id: (threshold.id > 0).then_some(threshold.id),
            field_name: threshold.field_name.clone(),
            actual_value: actual,
            threshold_value: threshold.value,
            operator: threshold.operator.clone(),
            severity: threshold.severity.clone(),
            message: threshold.message.clone(),
            triggered_at_ms,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at_ms: None,
        };
        if let Err(err) = self.inner.stores.alarm_logs.insert_alarm_log(log).await {
            warn!(
                target: "gw.datapath",
                device_id = data.device_id,
                error = %err,
                "alarm_log_insert_failed"
            );
        }
        gw_telemetry::record_alarm(threshold.shielded);
        info!(
            target: "gw.datapath",
            device_id = data.device_id,
            field = %threshold.field_name,
            actual,
            threshold = threshold.value,
            operator = %threshold.operator,
            shielded = threshold.shielded,
            "alarm_triggered"
        );
        if threshold.shielded {
            return;
        }
        let sink = self.inner.sink.read().clone();
        if let Some(sink) = sink {
            let payload = AlarmPayload {
                device_id: data.device_id,
                device_name: data.device_name.clone(),
                product_key: data.product_key.clone(),
                device_key: data.device_key.clone(),
                field_name: threshold.field_name.clone(),
                actual_value: actual,
                threshold: threshold.value,
                operator: threshold.operator.clone(),
                severity: threshold.severity.clone(),
                message: threshold.message.clone(),
                triggered_at_ms,
            };
            sink.emit_alarm(&payload).await;
        }
    }
}

fn numeric_field(fields: &BTreeMap<String, String>, name: &str) -> Option<f64> {
    let raw = fields.get(name).or_else(|| fields.get(name.trim()))?;
    raw.trim().parse::<f64>().ok()
}

fn spawn_loop<F, Fut>(period: Duration, mut tick: F) -> LoopTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let period = if period.is_zero() { Duration::from_secs(1) } else { period };
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => tick().await,
            }
        }
    });
    LoopTask { cancel, handle }
}
