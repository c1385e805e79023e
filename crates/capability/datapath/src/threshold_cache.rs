//! 阈值缓存：按设备缓存阈值，定期全量刷新。

use domain::Threshold;
use gw_storage::{DeviceStore, StorageError, ThresholdStore};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_THRESHOLD_TTL: Duration = Duration::from_secs(60);

struct CacheState {
    by_device: HashMap<i64, Vec<Threshold>>,
    refreshed_at: Option<Instant>,
}

struct RefreshTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ThresholdCacheInner {
    thresholds: Arc<dyn ThresholdStore>,
    devices: Arc<dyn DeviceStore>,
    enabled: bool,
    ttl: Duration,
    state: RwLock<CacheState>,
    task: tokio::sync::Mutex<Option<RefreshTask>>,
}

#[derive(Clone)]
pub struct ThresholdCache {
    inner: Arc<ThresholdCacheInner>,
}

impl ThresholdCache {
    /// `enabled` 为 false 时每次查询直接访问存储。
    pub fn new(
        thresholds: Arc<dyn ThresholdStore>,
        devices: Arc<dyn DeviceStore>,
        enabled: bool,
        ttl: Duration,
    ) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_THRESHOLD_TTL } else { ttl };
        Self {
            inner: Arc::new(ThresholdCacheInner {
                thresholds,
                devices,
                enabled,
                ttl,
                state: RwLock::new(CacheState {
                    by_device: HashMap::new(),
                    refreshed_at: None,
                }),
                task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// 全量重建缓存，只保留仍存在设备的阈值；返回缓存的阈值数。
    pub async fn refresh(&self) -> Result<usize, StorageError> {
        let devices = self.inner.devices.list_devices().await?;
        let thresholds = self.inner.thresholds.list_thresholds().await?;
        let valid: HashSet<i64> = devices
            .iter()
            .map(|device| device.id)
            .filter(|id| *id != 0)
            .collect();
        let mut next: HashMap<i64, Vec<Threshold>> = HashMap::new();
        let mut count = 0;
        for threshold in thresholds {
            if !valid.contains(&threshold.device_id) {
                continue;
            }
            next.entry(threshold.device_id).or_default().push(threshold);
            count += 1;
        }
        let devices_with_thresholds = next.len();
        {
            let mut state = self.inner.state.write();
            state.by_device = next;
            state.refreshed_at = Some(Instant::now());
        }
        info!(
            target: "gw.datapath",
            devices = devices_with_thresholds,
            thresholds = count,
            "threshold_cache_refreshed"
        );
        Ok(count)
    }

    /// 设备的阈值列表。
    ///
    /// 超过两倍 TTL 未刷新时先全量刷新；未命中时回源加载，非空结果写回缓存。
    pub async fn device_thresholds(&self, device_id: i64) -> Result<Vec<Threshold>, StorageError> {
        if !self.inner.enabled {
            return self.inner.thresholds.list_device_thresholds(device_id).await;
        }
        let stale = {
            let state = self.inner.state.read();
            state
                .refreshed_at
                .is_none_or(|at| at.elapsed() > self.inner.ttl * 2)
        };
        if stale {
            if let Err(err) = self.refresh().await {
                warn!(target: "gw.datapath", error = %err, "threshold_cache_refresh_failed");
            }
        }
        if let Some(cached) = self.inner.state.read().by_device.get(&device_id) {
            return Ok(cached.clone());
        }
        let loaded = self.inner.thresholds.list_device_thresholds(device_id).await?;
        if !loaded.is_empty() {
            self.inner
                .state
                .write()
                .by_device
                .insert(device_id, loaded.clone());
        }
        Ok(loaded)
    }

    pub fn invalidate_device(&self, device_id: i64) {
        self.inner.state.write().by_device.remove(&device_id);
    }

    /// 清空缓存，下一次查询触发全量刷新。
    pub fn invalidate_all(&self) {
        let mut state = self.inner.state.write();
        state.by_device.clear();
        state.refreshed_at = None;
    }

    /// 立即刷新一次并启动周期刷新；已启动或未启用时直接返回。
    pub async fn start(&self) {
        if !self.inner.enabled {
            return;
        }
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            return;
        }
        if let Err(err) = self.refresh().await {
            warn!(target: "gw.datapath", error = %err, "threshold_cache_refresh_failed");
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let cache = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.inner.ttl);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = cache.refresh().await {
                            warn!(target: "gw.datapath", error = %err, "threshold_cache_refresh_failed");
                        }
                    }
                }
            }
        });
        *task = Some(RefreshTask { cancel, handle });
        info!(target: "gw.datapath", ttl_ms = self.inner.ttl.as_millis() as u64, "threshold_cache_started");
    }

    pub async fn stop(&self) {
        if let Some(task) = self.inner.task.lock().await.take() {
            task.cancel.cancel();
            let _ = task.handle.await;
            info!(target: "gw.datapath", "threshold_cache_stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.task.lock().await.is_some()
    }
}
