//! 采集调度器
//!
//! - 编排循环：按 device_sync 周期同步设备表，为每台启用设备维护一个轮询任务
//! - 命令循环：按 command_poll 周期执行本地与北向下发的写命令
//! - 系统状态循环：可选，定期写入 `__system__` 设备
//!
//! 同一资源上的调用由执行器串行化；并发采集数受 workers 信号量限制。

use crate::command::{COMMAND_BATCH, CommandQueue, command_params, normalize_command};
use crate::error::CollectorError;
use crate::poll::{PollOutcome, PollState, should_store_history};
use crate::system::{DEFAULT_SYSTEM_STATS_INTERVAL, SystemStatsSampler};
use domain::{CollectData, Device, NorthboundCommand, NorthboundCommandResult};
use gw_datapath::DataPath;
use gw_driver::{DriverError, DriverExecutor, WRITE_FUNCTION};
use gw_northbound::Dispatcher;
use gw_storage::{DeviceStore, GatewayConfigStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MIN_RUNTIME_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_DEVICE_SYNC_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_WORKERS: usize = 10;

/// 可在运行期调整的循环周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeIntervals {
    pub device_sync: Duration,
    pub command_poll: Duration,
}

impl Default for RuntimeIntervals {
    fn default() -> Self {
        Self {
            device_sync: DEFAULT_DEVICE_SYNC_INTERVAL,
            command_poll: DEFAULT_COMMAND_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub intervals: RuntimeIntervals,
    /// 最大并发采集数，0 取默认值
    pub workers: usize,
    pub system_stats_enabled: bool,
    pub system_stats_interval: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            intervals: RuntimeIntervals::default(),
            workers: DEFAULT_WORKERS,
            system_stats_enabled: false,
            system_stats_interval: DEFAULT_SYSTEM_STATS_INTERVAL,
        }
    }
}

/// 调度器依赖的协作者
#[derive(Clone)]
pub struct CollectorDeps {
    pub executor: Arc<DriverExecutor>,
    pub devices: Arc<dyn DeviceStore>,
    pub gateway: Arc<dyn GatewayConfigStore>,
    pub datapath: DataPath,
    pub dispatcher: Dispatcher,
}

struct DeviceWorker {
    device: Device,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct RunState {
    cancel: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

struct CollectorInner {
    deps: CollectorDeps,
    settings: CollectorSettings,
    intervals: watch::Sender<RuntimeIntervals>,
    limiter: Arc<Semaphore>,
    workers: Mutex<HashMap<i64, DeviceWorker>>,
    /// 设备上次写历史的采集时间（毫秒），跨任务重启保留
    history_marks: Mutex<HashMap<i64, i64>>,
    commands: CommandQueue,
    sampler: SystemStatsSampler,
    wake: Notify,
    run: tokio::sync::Mutex<Option<RunState>>,
}

#[derive(Clone)]
pub struct Collector {
    inner: Arc<CollectorInner>,
}

fn clamp_interval(value: Duration, current: Duration) -> Duration {
    if value.is_zero() {
        current
    } else {
        value.max(MIN_RUNTIME_INTERVAL)
    }
}

impl Collector {
    pub fn new(deps: CollectorDeps, settings: CollectorSettings) -> Self {
        let workers = if settings.workers == 0 {
            DEFAULT_WORKERS
        } else {
            settings.workers
        };
        let defaults = RuntimeIntervals::default();
        let intervals = RuntimeIntervals {
            device_sync: clamp_interval(settings.intervals.device_sync, defaults.device_sync),
            command_poll: clamp_interval(settings.intervals.command_poll, defaults.command_poll),
        };
        let (tx, _rx) = watch::channel(intervals);
        Self {
            inner: Arc::new(CollectorInner {
                deps,
                settings,
                intervals: tx,
                limiter: Arc::new(Semaphore::new(workers)),
                workers: Mutex::new(HashMap::new()),
                history_marks: Mutex::new(HashMap::new()),
                commands: CommandQueue::default(),
                sampler: SystemStatsSampler::new(),
                wake: Notify::new(),
                run: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub async fn start(&self) -> Result<(), CollectorError> {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }
        let cancel = CancellationToken::new();
        let mut loops = vec![
            tokio::spawn(orchestrate(self.inner.clone(), cancel.clone())),
            tokio::spawn(poll_commands(self.inner.clone(), cancel.clone())),
        ];
        if self.inner.settings.system_stats_enabled {
            loops.push(tokio::spawn(sample_system(self.inner.clone(), cancel.clone())));
        }
        *run = Some(RunState { cancel, loops });
        info!(
            target: "gw.collector",
            workers = self.inner.limiter.available_permits(),
            system_stats = self.inner.settings.system_stats_enabled,
            "collector_started"
        );
        Ok(())
    }

    /// 停止全部循环与设备任务，等待进行中的调用结束后关闭资源句柄。
    pub async fn stop(&self) -> Result<(), CollectorError> {
        let state = self
            .inner
            .run
            .lock()
            .await
            .take()
            .ok_or(CollectorError::NotRunning)?;
        state.cancel.cancel();
        for handle in state.loops {
            let _ = handle.await;
        }

        let workers: Vec<DeviceWorker> = self
            .inner
            .workers
            .lock()
            .drain()
            .map(|(_, worker)| worker)
            .collect();
        let stopped = workers.len();
        for worker in workers {
            worker.cancel.cancel();
            let bound = worker.device.call_timeout() + MIN_RUNTIME_INTERVAL;
            if tokio::time::timeout(bound, worker.handle).await.is_err() {
                warn!(
                    target: "gw.collector",
                    device_id = worker.device.id,
                    "device_worker_stop_timeout"
                );
            }
        }
        self.inner.deps.executor.close_all_resources().await;
        info!(target: "gw.collector", workers = stopped, "collector_stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.run.lock().await.is_some()
    }

    /// 0 表示保持原值，其余值不低于 100ms；运行中的循环立即采用新值。
    pub fn set_runtime_intervals(&self, device_sync: Duration, command_poll: Duration) -> RuntimeIntervals {
        let mut applied = RuntimeIntervals::default();
        self.inner.intervals.send_modify(|current| {
            current.device_sync = clamp_interval(device_sync, current.device_sync);
            current.command_poll = clamp_interval(command_poll, current.command_poll);
            applied = *current;
        });
        info!(
            target: "gw.collector",
            device_sync_ms = applied.device_sync.as_millis() as u64,
            command_poll_ms = applied.command_poll.as_millis() as u64,
            "runtime_intervals_updated"
        );
        applied
    }

    pub fn get_runtime_intervals(&self) -> RuntimeIntervals {
        *self.inner.intervals.borrow()
    }

    /// 唤醒编排循环立即同步设备表。
    pub fn sync_now(&self) {
        self.inner.wake.notify_one();
    }

    /// 当前有轮询任务的设备 id（升序）。
    pub fn active_devices(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.workers.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// 本地写命令入队，由命令循环执行。
    pub fn enqueue_write(&self, command: NorthboundCommand) {
        if self.inner.commands.push(command) {
            warn!(target: "gw.collector", "local_command_dropped");
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.commands.len()
    }

    /// 本地写命令的最近执行结果，最新的在前。
    pub fn recent_command_results(&self) -> Vec<NorthboundCommandResult> {
        self.inner.commands.recent_results()
    }

    /// 执行一条写命令并返回结果（不经过队列）。
    pub async fn execute_write(&self, command: &NorthboundCommand) -> NorthboundCommandResult {
        let cancel = CancellationToken::new();
        self.inner.run_command(command, &cancel).await
    }

    /// 采样系统状态并写入数据通路。
    pub async fn collect_system_stats(&self) -> CollectData {
        self.inner.collect_system_stats().await
    }
}

impl CollectorInner {
    /// 对比设备表与现有任务：停止已删除/禁用/参数变化/已退出的任务，为新设备启动任务。
    async fn sync_devices(self: &Arc<Self>, parent: &CancellationToken) -> Result<usize, CollectorError> {
        let devices = self.deps.devices.list_devices().await?;
        let known: Vec<i64> = devices.iter().map(|device| device.id).collect();
        let wanted: HashMap<i64, Device> = devices
            .into_iter()
            .filter(|device| device.enabled && device.id > 0)
            .filter(|device| {
                if device.driver_id.is_none() {
                    debug!(target: "gw.collector", device_id = device.id, "device_without_driver_skipped");
                }
                device.driver_id.is_some()
            })
            .map(|device| (device.id, device))
            .collect();

        let (started, stopped, active) = {
            let mut workers = self.workers.lock();
            let mut stopped = 0usize;
            workers.retain(|id, worker| {
                let keep = !worker.handle.is_finished()
                    && wanted.get(id).is_some_and(|device| *device == worker.device);
                if !keep {
                    worker.cancel.cancel();
                    stopped += 1;
                }
                keep
            });

            let mut started = 0usize;
            for (id, device) in &wanted {
                if workers.contains_key(id) {
                    continue;
                }
                let cancel = parent.child_token();
                let handle = tokio::spawn(run_device(self.clone(), device.clone(), cancel.clone()));
                workers.insert(
                    *id,
                    DeviceWorker {
                        device: device.clone(),
                        cancel,
                        handle,
                    },
                );
                started += 1;
            }
            (started, stopped, workers.len())
        };

        self.history_marks.lock().retain(|id, _| known.contains(id));
        if started > 0 || stopped > 0 {
            info!(
                target: "gw.collector",
                active,
                started,
                stopped,
                "devices_synced"
            );
        }
        Ok(active)
    }

    /// 一次读调用，受设备超时约束。
    async fn read_device(&self, device: &Device, cancel: &CancellationToken) -> Result<CollectData, CollectorError> {
        let read = self.deps.executor.collect_data(device, cancel);
        let mut data = match tokio::time::timeout(device.call_timeout(), read).await {
            Ok(result) => result?,
            Err(_) => return Err(DriverError::DriverTimeout.into()),
        };
        self.fill_identity(&mut data).await;
        Ok(data)
    }

    /// 设备未配置身份时使用网关身份。
    async fn fill_identity(&self, data: &mut CollectData) {
        if !data.product_key.is_empty() && !data.device_key.is_empty() {
            return;
        }
        match self.deps.gateway.get_gateway_config().await {
            Ok(gateway) => {
                if data.product_key.is_empty() {
                    data.product_key = gateway.product_key;
                }
                if data.device_key.is_empty() {
                    data.device_key = gateway.device_key;
                }
            }
            Err(err) => {
                warn!(target: "gw.collector", device_id = data.device_id, error = %err, "gateway_identity_unavailable");
            }
        }
    }

    fn should_store(&self, device: &Device, collected_at_ms: i64) -> bool {
        let mut marks = self.history_marks.lock();
        let store = should_store_history(
            marks.get(&device.id).copied(),
            collected_at_ms,
            device.storage_interval(),
        );
        if store {
            marks.insert(device.id, collected_at_ms);
        }
        store
    }

    async fn publish(&self, device: &Device, data: &CollectData) {
        if data.fields.is_empty() {
            debug!(target: "gw.collector", device_id = device.id, "collect_empty");
            return;
        }
        let store = self.should_store(device, data.timestamp_ms);
        let outcome = self.deps.datapath.write(data, store).await;
        self.deps.dispatcher.send_data(data);
        debug!(
            target: "gw.collector",
            device_id = device.id,
            fields = data.fields.len(),
            history = store,
            alarms = outcome.alarms,
            "collect_ok"
        );
    }

    async fn collect_once(&self, device: &Device, cancel: &CancellationToken) -> PollOutcome {
        match self.read_device(device, cancel).await {
            Ok(data) => {
                self.publish(device, &data).await;
                gw_telemetry::record_collection(true);
                PollOutcome::Success
            }
            Err(CollectorError::Driver(DriverError::Canceled)) if cancel.is_cancelled() => {
                PollOutcome::Failed
            }
            Err(err) => {
                gw_telemetry::record_collection(false);
                warn!(
                    target: "gw.collector",
                    device_id = device.id,
                    device = %device.name,
                    resource_id = device.resource_id.unwrap_or(0),
                    error = %err,
                    "collect_failed"
                );
                match err {
                    CollectorError::Driver(err) if err.is_resource_open() => {
                        PollOutcome::ResourceOpenFailed
                    }
                    _ => PollOutcome::Failed,
                }
            }
        }
    }

    async fn write_device(&self, command: &NorthboundCommand, cancel: &CancellationToken) -> Result<(), CollectorError> {
        let command = normalize_command(command)?;
        let device = self
            .deps
            .devices
            .find_by_identity(&command.product_key, &command.device_key)
            .await?
            .ok_or_else(|| {
                CollectorError::DeviceNotFound(format!(
                    "{}/{}",
                    command.product_key, command.device_key
                ))
            })?;
        if device.driver_id.is_none() {
            return Err(CollectorError::InvalidCommand(format!(
                "device {} has no driver",
                device.name
            )));
        }
        let params = command_params(&command, &device);
        let call = self
            .deps
            .executor
            .execute_command(&device, WRITE_FUNCTION, &params, cancel);
        match tokio::time::timeout(device.call_timeout(), call).await {
            Ok(result) => result.map(|_| ()).map_err(CollectorError::from),
            Err(_) => Err(DriverError::DriverTimeout.into()),
        }
    }

    async fn run_command(&self, command: &NorthboundCommand, cancel: &CancellationToken) -> NorthboundCommandResult {
        let outcome = self.write_device(command, cancel).await;
        gw_telemetry::record_command(outcome.is_ok());
        match &outcome {
            Ok(()) => info!(
                target: "gw.collector",
                request_id = %command.request_id,
                field = %command.field_name,
                source = %command.source,
                "command_executed"
            ),
            Err(err) => warn!(
                target: "gw.collector",
                request_id = %command.request_id,
                field = %command.field_name,
                source = %command.source,
                error = %err,
                "command_failed"
            ),
        }
        NorthboundCommandResult::from_command(command, outcome.map_err(|err| err.to_string()))
    }

    /// 本地队列优先，余量从北向拉取；北向命令的结果回报给来源目的地。
    async fn process_commands(&self, cancel: &CancellationToken) -> usize {
        let local = self.commands.drain(COMMAND_BATCH);
        let remote = match COMMAND_BATCH.saturating_sub(local.len()) {
            0 => Vec::new(),
            limit => self.deps.dispatcher.pull_commands(limit).await,
        };
        let total = local.len() + remote.len();
        for command in local {
            if cancel.is_cancelled() {
                break;
            }
            let result = self.run_command(&command, cancel).await;
            self.commands.record_result(result);
        }
        for command in remote {
            if cancel.is_cancelled() {
                break;
            }
            let result = self.run_command(&command, cancel).await;
            self.deps.dispatcher.report_command_result(&result).await;
        }
        total
    }

    async fn collect_system_stats(&self) -> CollectData {
        let mut data = self
            .sampler
            .sample()
            .to_collect_data(domain::now_epoch_ms());
        self.fill_identity(&mut data).await;
        self.deps.datapath.write(&data, true).await;
        self.deps.dispatcher.send_data(&data);
        data
    }
}

async fn orchestrate(inner: Arc<CollectorInner>, cancel: CancellationToken) {
    let mut intervals = inner.intervals.subscribe();
    loop {
        if let Err(err) = inner.sync_devices(&cancel).await {
            warn!(target: "gw.collector", error = %err, "device_sync_failed");
        }
        let period = intervals.borrow_and_update().device_sync;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
            _ = inner.wake.notified() => {}
            changed = intervals.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn poll_commands(inner: Arc<CollectorInner>, cancel: CancellationToken) {
    let mut intervals = inner.intervals.subscribe();
    loop {
        let period = intervals.borrow_and_update().command_poll;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {
                inner.process_commands(&cancel).await;
            }
            changed = intervals.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn sample_system(inner: Arc<CollectorInner>, cancel: CancellationToken) {
    let period = if inner.settings.system_stats_interval.is_zero() {
        DEFAULT_SYSTEM_STATS_INTERVAL
    } else {
        inner.settings.system_stats_interval.max(MIN_RUNTIME_INTERVAL)
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                inner.collect_system_stats().await;
            }
        }
    }
}

/// 单设备轮询：首轮立即采集，之后按 `上次开始 + 周期` 等待，错过的周期不补。
async fn run_device(inner: Arc<CollectorInner>, device: Device, cancel: CancellationToken) {
    let mut state = PollState::new(device.collect_interval());
    debug!(
        target: "gw.collector",
        device_id = device.id,
        interval_ms = state.interval().as_millis() as u64,
        "device_worker_started"
    );
    loop {
        let delay = state.next_delay(Instant::now());
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = inner.limiter.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        state.mark_started(Instant::now());
        let outcome = inner.collect_once(&device, &cancel).await;
        drop(permit);
        if cancel.is_cancelled() {
            break;
        }
        if let Some(backoff) = state.record(outcome, Instant::now()) {
            warn!(
                target: "gw.collector",
                device_id = device.id,
                backoff_ms = backoff.as_millis() as u64,
                "device_backoff"
            );
        }
    }
    debug!(target: "gw.collector", device_id = device.id, "device_worker_stopped");
}
