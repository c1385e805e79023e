//! 告警去重状态、重复间隔解析与告警出口。

use async_trait::async_trait;
use domain::{AlarmPayload, Threshold};
use gw_storage::GatewayConfigStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(60);
const REPEAT_CACHE_TTL: Duration = Duration::from_secs(5);
const PRUNE_EVERY: u64 = 512;
const MIN_STATE_TTL: Duration = Duration::from_secs(24 * 3600);
const MAX_STATE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// 告警去重键：有 id 的阈值按 id，否则按 (字段, 运算符, 阈值)。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AlarmKey {
    ById {
        device_id: i64,
        threshold_id: i64,
    },
    ByRule {
        device_id: i64,
        field: String,
        operator: String,
        value_bits: u64,
    },
}

impl AlarmKey {
    fn new(device_id: i64, threshold: &Threshold) -> Self {
        if threshold.id > 0 {
            return Self::ById {
                device_id,
                threshold_id: threshold.id,
            };
        }
        Self::ByRule {
            device_id,
            field: threshold.field_name.trim().to_lowercase(),
            operator: threshold.operator.trim().to_string(),
            value_bits: threshold.value.to_bits(),
        }
    }

    fn device_id(&self) -> i64 {
        match self {
            Self::ById { device_id, .. } | Self::ByRule { device_id, .. } => *device_id,
        }
    }
}

struct StateInner {
    last_emitted: HashMap<AlarmKey, Instant>,
    calls: u64,
}

/// 每个 (设备, 阈值) 在重复间隔内最多触发一次。
pub struct AlarmState {
    inner: Mutex<StateInner>,
}

impl AlarmState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                last_emitted: HashMap::new(),
                calls: 0,
            }),
        }
    }

    /// 判定本次命中是否需要触发；未命中时保持原状态。
    pub fn should_emit(
        &self,
        device_id: i64,
        threshold: &Threshold,
        matched: bool,
        repeat: Duration,
    ) -> bool {
        let repeat = if repeat.is_zero() { DEFAULT_REPEAT_INTERVAL } else { repeat };
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.calls += 1;
        if inner.calls % PRUNE_EVERY == 0 {
            let ttl = state_ttl(repeat);
            inner
                .last_emitted
                .retain(|_, last| now.duration_since(*last) <= ttl);
        }
        if !matched {
            return false;
        }
        let key = AlarmKey::new(device_id, threshold);
        match inner.last_emitted.get(&key) {
            Some(last) if now.duration_since(*last) < repeat => false,
            _ => {
                inner.last_emitted.insert(key, now);
                true
            }
        }
    }

    pub fn clear_device(&self, device_id: i64) {
        self.inner
            .lock()
            .last_emitted
            .retain(|key, _| key.device_id() != device_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().last_emitted.is_empty()
    }
}

impl Default for AlarmState {
    fn default() -> Self {
        Self::new()
    }
}

fn state_ttl(repeat: Duration) -> Duration {
    (repeat * 120).clamp(MIN_STATE_TTL, MAX_STATE_TTL)
}

/// 从网关配置读取告警重复间隔，缓存 5 秒。
pub struct RepeatIntervalResolver {
    store: Arc<dyn GatewayConfigStore>,
    cached: Mutex<Option<(Duration, Instant)>>,
}

impl RepeatIntervalResolver {
    pub fn new(store: Arc<dyn GatewayConfigStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    pub async fn resolve(&self) -> Duration {
        if let Some((interval, at)) = *self.cached.lock() {
            if at.elapsed() < REPEAT_CACHE_TTL {
                return interval;
            }
        }
        let interval = match self.store.get_gateway_config().await {
            Ok(config) if config.alarm_repeat_interval_seconds > 0 => {
                Duration::from_secs(config.alarm_repeat_interval_seconds as u64)
            }
            Ok(_) => DEFAULT_REPEAT_INTERVAL,
            Err(err) => {
                warn!(target: "gw.datapath", error = %err, "alarm_repeat_interval_load_failed");
                DEFAULT_REPEAT_INTERVAL
            }
        };
        *self.cached.lock() = Some((interval, Instant::now()));
        interval
    }

    /// 配置修改后调用，下一次解析重新读取。
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

/// 告警出口。
#[async_trait]
pub trait AlarmSink: Send + Sync {
    async fn emit_alarm(&self, alarm: &AlarmPayload);
}

#[async_trait]
impl AlarmSink for gw_northbound::Dispatcher {
    async fn emit_alarm(&self, alarm: &AlarmPayload) {
        self.send_alarm(alarm).await;
    }
}
