//! 北向分发器：每个目的地一个待发槽（最新值覆盖）、独立上传周期与熔断器。
//!
//! 约束：
//! - 目的地表由单把锁保护，刷新循环先复制快照再在锁外发送；
//! - 告警不缓存，直接经熔断器发送；
//! - 发送成功只清理发送时的那一份待发数据，期间到达的新数据保留到下一次。

use crate::adapter::{NorthboundAdapter, new_adapter};
use crate::breaker::{BreakerConfig, BreakerStats, CircuitBreaker};
use crate::error::NorthboundError;
use domain::{
    AlarmPayload, CollectData, NorthboundCommand, NorthboundCommandResult, NorthboundConfig,
    now_epoch_ms,
};
use gw_storage::NorthboundConfigStore;
use gw_telemetry::{record_breaker_rejection, record_northbound_send};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 刷新循环周期
pub const FLUSH_TICK: Duration = Duration::from_millis(200);
/// 上传周期下限
pub const MIN_UPLOAD_INTERVAL: Duration = Duration::from_millis(500);
const MAX_COMMAND_ORIGINS: usize = 4096;

struct Destination {
    adapter: Arc<dyn NorthboundAdapter>,
    breaker: Arc<CircuitBreaker>,
    /// 0 表示每个刷新周期都发送
    interval: Duration,
    enabled: bool,
    last_sent: Option<Instant>,
    last_sent_at_ms: Option<i64>,
    pending: Option<(u64, Arc<CollectData>)>,
}

impl Destination {
    fn due(&self, now: Instant) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        match self.last_sent {
            Some(at) => now.saturating_duration_since(at) >= self.interval,
            None => true,
        }
    }
}

/// 目的地运行状态
#[derive(Debug, Clone, Serialize)]
pub struct DestinationStatus {
    pub name: String,
    pub enabled: bool,
    pub interval_ms: u64,
    pub last_sent_at_ms: Option<i64>,
    pub has_pending: bool,
    pub breaker: BreakerStats,
}

struct FlushTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct DispatcherInner {
    destinations: Mutex<HashMap<String, Destination>>,
    breaker_config: BreakerConfig,
    seq: AtomicU64,
    /// (request_id, field_name) → 命令来源目的地
    command_origins: Mutex<HashMap<(String, String), String>>,
    flush_task: tokio::sync::Mutex<Option<FlushTask>>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_breaker_config(BreakerConfig::default())
    }

    pub fn with_breaker_config(breaker_config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                destinations: Mutex::new(HashMap::new()),
                breaker_config,
                seq: AtomicU64::new(0),
                command_origins: Mutex::new(HashMap::new()),
                flush_task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// 注册（或替换）目的地：关闭旧适配器，重置熔断器，默认启用。
    pub async fn register(&self, name: &str, adapter: Arc<dyn NorthboundAdapter>) {
        let destination = Destination {
            adapter,
            breaker: Arc::new(CircuitBreaker::new(self.inner.breaker_config)),
            interval: Duration::ZERO,
            enabled: true,
            last_sent: None,
            last_sent_at_ms: None,
            pending: None,
        };
        let previous = self
            .inner
            .destinations
            .lock()
            .insert(name.to_string(), destination);
        if let Some(previous) = previous {
            close_adapter(name, previous.adapter).await;
        }
        info!(target: "gw.northbound", adapter = %name, "northbound_registered");
    }

    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.inner.destinations.lock().remove(name);
        match removed {
            Some(previous) => {
                close_adapter(name, previous.adapter).await;
                info!(target: "gw.northbound", adapter = %name, "northbound_removed");
                true
            }
            None => false,
        }
    }

    /// 设置上传周期（下限 500ms），并重置上次发送时间使新周期立即生效。
    pub fn set_interval(&self, name: &str, interval: Duration) -> bool {
        let mut destinations = self.inner.destinations.lock();
        let Some(destination) = destinations.get_mut(name) else {
            return false;
        };
        destination.interval = interval.max(MIN_UPLOAD_INTERVAL);
        destination.last_sent = None;
        true
    }

    /// 禁用时清空待发数据与上次发送时间。
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut destinations = self.inner.destinations.lock();
        let Some(destination) = destinations.get_mut(name) else {
            return false;
        };
        destination.enabled = enabled;
        if !enabled {
            destination.pending = None;
            destination.last_sent = None;
        }
        info!(target: "gw.northbound", adapter = %name, enabled, "northbound_enabled_changed");
        true
    }

    pub fn reset_breaker(&self, name: &str) -> bool {
        let destinations = self.inner.destinations.lock();
        match destinations.get(name) {
            Some(destination) => {
                destination.breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.destinations.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.destinations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 覆盖每个目的地的待发槽（含已禁用的，启用后发送最新值）。
    pub fn send_data(&self, data: &CollectData) {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let shared = Arc::new(data.clone());
        let mut destinations = self.inner.destinations.lock();
        for destination in destinations.values_mut() {
            destination.pending = Some((seq, shared.clone()));
        }
    }

    /// 告警立即发往每个启用目的地；失败只记录日志。
    pub async fn send_alarm(&self, alarm: &AlarmPayload) {
        let targets: Vec<String> = {
            let destinations = self.inner.destinations.lock();
            let mut names: Vec<String> = destinations
                .iter()
                .filter(|(_, destination)| destination.enabled)
                .map(|(name, _)| name.clone())
                .collect();
            names.sort();
            names
        };
        for name in targets {
            let _ = self.send_alarm_to(&name, alarm).await;
        }
    }

    /// 经熔断器向单个目的地发送告警。
    pub async fn send_alarm_to(&self, name: &str, alarm: &AlarmPayload) -> Result<(), NorthboundError> {
        let (adapter, breaker) = {
            let destinations = self.inner.destinations.lock();
            let destination = destinations
                .get(name)
                .ok_or_else(|| NorthboundError::NotFound(name.to_string()))?;
            (destination.adapter.clone(), destination.breaker.clone())
        };
        let result = breaker.call(adapter.send_alarm(alarm)).await;
        observe_send(name, "alarm", &result);
        result
    }

    /// 执行一次刷新：按各自周期把待发数据推给适配器。
    pub async fn flush_pending(&self) {
        let now = Instant::now();
        let due: Vec<(String, Arc<dyn NorthboundAdapter>, Arc<CircuitBreaker>, u64, Arc<CollectData>)> = {
            let destinations = self.inner.destinations.lock();
            destinations
                .iter()
                .filter(|(_, destination)| destination.enabled && destination.due(now))
                .filter_map(|(name, destination)| {
                    destination.pending.as_ref().map(|(seq, data)| {
                        (
                            name.clone(),
                            destination.adapter.clone(),
                            destination.breaker.clone(),
                            *seq,
                            data.clone(),
                        )
                    })
                })
                .collect()
        };

        for (name, adapter, breaker, seq, data) in due {
            let result = breaker.call(adapter.send(&data)).await;
            observe_send(&name, "data", &result);
            if result.is_err() {
                continue;
            }
            let mut destinations = self.inner.destinations.lock();
            if let Some(destination) = destinations.get_mut(&name) {
                if !destination.enabled || !Arc::ptr_eq(&destination.adapter, &adapter) {
                    continue;
                }
                destination.last_sent = Some(Instant::now());
                destination.last_sent_at_ms = Some(now_epoch_ms());
                if matches!(destination.pending, Some((pending_seq, _)) if pending_seq == seq) {
                    destination.pending = None;
                }
            }
        }
    }

    /// 启动刷新循环；已启动时直接返回。
    pub async fn start(&self) {
        let mut task = self.inner.flush_task.lock().await;
        if task.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let dispatcher = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => dispatcher.flush_pending().await,
                }
            }
        });
        *task = Some(FlushTask { cancel, handle });
        info!(target: "gw.northbound", "northbound_dispatcher_started");
    }

    /// 停止刷新循环并关闭全部适配器。
    pub async fn stop(&self) {
        if let Some(task) = self.inner.flush_task.lock().await.take() {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
        let drained: Vec<(String, Destination)> =
            self.inner.destinations.lock().drain().collect();
        for (name, destination) in drained {
            close_adapter(&name, destination.adapter).await;
        }
        info!(target: "gw.northbound", "northbound_dispatcher_stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.flush_task.lock().await.is_some()
    }

    pub fn status(&self) -> Vec<DestinationStatus> {
        let destinations = self.inner.destinations.lock();
        let mut statuses: Vec<DestinationStatus> = destinations
            .iter()
            .map(|(name, destination)| DestinationStatus {
                name: name.clone(),
                enabled: destination.enabled,
                interval_ms: destination.interval.as_millis() as u64,
                last_sent_at_ms: destination.last_sent_at_ms,
                has_pending: destination.pending.is_some(),
                breaker: destination.breaker.stats(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn status_of(&self, name: &str) -> Option<DestinationStatus> {
        self.status().into_iter().find(|status| status.name == name)
    }

    /// 按一条配置重建目的地；初始化失败时移除该目的地并返回错误。
    pub async fn apply_config(&self, config: &NorthboundConfig) -> Result<(), NorthboundError> {
        if !config.enabled {
            self.remove(&config.name).await;
            return Ok(());
        }
        let adapter = new_adapter(config.kind, &config.name);
        if let Err(err) = adapter.initialize(&config.config).await {
            self.remove(&config.name).await;
            warn!(
                target: "gw.northbound",
                adapter = %config.name,
                kind = config.kind.as_str(),
                error = %err,
                "northbound_initialize_failed"
            );
            return Err(err);
        }
        self.register(&config.name, adapter).await;
        if config.upload_interval_ms > 0 {
            self.set_interval(&config.name, Duration::from_millis(config.upload_interval_ms as u64));
        }
        Ok(())
    }

    /// 从配置存储重建所有目的地，返回成功启用的数量。
    pub async fn reload_from_configs(
        &self,
        store: &dyn NorthboundConfigStore,
    ) -> Result<usize, NorthboundError> {
        let configs = store.list_northbound_configs().await?;
        let wanted: HashSet<&str> = configs.iter().map(|config| config.name.as_str()).collect();
        for name in self.names() {
            if !wanted.contains(name.as_str()) {
                self.remove(&name).await;
            }
        }
        let mut active = 0;
        for config in &configs {
            if self.apply_config(config).await.is_ok() && config.enabled {
                active += 1;
            }
        }
        info!(target: "gw.northbound", configs = configs.len(), active, "northbound_reloaded");
        Ok(active)
    }

    /// 从启用的目的地拉取下行命令（按名称顺序，合计不超过 `limit`）。
    pub async fn pull_commands(&self, limit: usize) -> Vec<NorthboundCommand> {
        let sources: Vec<(String, Arc<dyn NorthboundAdapter>)> = {
            let destinations = self.inner.destinations.lock();
            let mut sources: Vec<(String, Arc<dyn NorthboundAdapter>)> = destinations
                .iter()
                .filter(|(_, destination)| destination.enabled)
                .map(|(name, destination)| (name.clone(), destination.adapter.clone()))
                .collect();
            sources.sort_by(|a, b| a.0.cmp(&b.0));
            sources
        };
        let mut out = Vec::new();
        for (name, adapter) in sources {
            let remaining = limit.saturating_sub(out.len());
            if remaining == 0 {
                break;
            }
            match adapter.pull_commands(remaining).await {
                Ok(commands) => {
                    if !commands.is_empty() {
                        let mut origins = self.inner.command_origins.lock();
                        if origins.len() > MAX_COMMAND_ORIGINS {
                            origins.clear();
                        }
                        for command in &commands {
                            origins.insert(
                                (command.request_id.clone(), command.field_name.clone()),
                                name.clone(),
                            );
                        }
                    }
                    out.extend(commands);
                }
                Err(err) => {
                    warn!(target: "gw.northbound", adapter = %name, error = %err, "northbound_pull_commands_failed");
                }
            }
        }
        out
    }

    /// 把执行结果回报给命令来源；来源未知时回报给所有启用目的地。
    pub async fn report_command_result(&self, result: &NorthboundCommandResult) {
        let origin = self
            .inner
            .command_origins
            .lock()
            .remove(&(result.request_id.clone(), result.field_name.clone()));
        let targets: Vec<(String, Arc<dyn NorthboundAdapter>)> = {
            let destinations = self.inner.destinations.lock();
            destinations
                .iter()
                .filter(|(name, destination)| match &origin {
                    Some(origin) => name.as_str() == origin.as_str(),
                    None => destination.enabled,
                })
                .map(|(name, destination)| (name.clone(), destination.adapter.clone()))
                .collect()
        };
        for (name, adapter) in targets {
            if let Err(err) = adapter.report_command_result(result).await {
                warn!(
                    target: "gw.northbound",
                    adapter = %name,
                    request_id = %result.request_id,
                    error = %err,
                    "northbound_report_result_failed"
                );
            }
        }
    }
}

fn observe_send(name: &str, kind: &str, result: &Result<(), NorthboundError>) {
    match result {
        Ok(()) => record_northbound_send(true),
        Err(NorthboundError::CircuitOpen { retry_after }) => {
            record_breaker_rejection();
            warn!(
                target: "gw.northbound",
                adapter = %name,
                kind,
                retry_after_ms = retry_after.as_millis() as u64,
                "northbound_circuit_open"
            );
        }
        Err(err) => {
            record_northbound_send(false);
            warn!(target: "gw.northbound", adapter = %name, kind, error = %err, "northbound_send_failed");
        }
    }
}

async fn close_adapter(name: &str, adapter: Arc<dyn NorthboundAdapter>) {
    if let Err(err) = adapter.close().await {
        warn!(target: "gw.northbound", adapter = %name, error = %err, "northbound_close_failed");
    }
}
