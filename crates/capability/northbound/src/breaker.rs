//! 单目的地熔断器。
//!
//! 状态：Closed → Open（窗口内失败数达到阈值）→ HalfOpen（恢复超时后放行单个探测）
//! → Closed（半开连续成功达到阈值）；半开期间任一失败回到 Open。

use crate::error::NorthboundError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// 熔断器参数
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: usize,
    pub failure_window: Duration,
    pub success_threshold: usize,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// 熔断器统计
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub request_count: u64,
    pub failure_count: u64,
    pub success_count: u64,
    pub rejected_count: u64,
    pub failure_rate: f64,
    pub retry_after_ms: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    half_open_successes: usize,
    probe_in_flight: bool,
    last_failure: Option<Instant>,
    request_count: u64,
    failure_count: u64,
    success_count: u64,
    rejected_count: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            half_open_successes: 0,
            probe_in_flight: false,
            last_failure: None,
            request_count: 0,
            failure_count: 0,
            success_count: 0,
            rejected_count: 0,
        }
    }

    fn retry_after(&self, config: &BreakerConfig, now: Instant) -> Duration {
        match self.last_failure {
            Some(at) => config
                .recovery_timeout
                .saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    /// Open 且恢复超时已过时转入 HalfOpen。
    fn refresh(&mut self, config: &BreakerConfig, now: Instant) {
        if self.state == BreakerState::Open && self.retry_after(config, now).is_zero() {
            self.state = BreakerState::HalfOpen;
            self.half_open_successes = 0;
            self.probe_in_flight = false;
            self.failures.clear();
        }
    }

    fn prune(&mut self, config: &BreakerConfig, now: Instant) {
        while let Some(front) = self.failures.front() {
            if now.saturating_duration_since(*front) >= config.failure_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// 熔断器
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// 一次放行的调用；未调用 `finish` 即被丢弃时释放半开探测名额。
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    finished: bool,
}

impl BreakerPermit<'_> {
    pub fn finish(mut self, ok: bool) {
        self.finished = true;
        self.breaker.record(ok, self.probe);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.finished && self.probe {
            self.breaker.inner.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        inner.refresh(&self.config, Instant::now());
        inner.state
    }

    /// 申请一次调用；打开状态或半开探测已占用时返回 `CircuitOpen`。
    pub fn acquire(&self) -> Result<BreakerPermit<'_>, NorthboundError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.request_count += 1;
        inner.refresh(&self.config, now);
        match inner.state {
            BreakerState::Closed => Ok(BreakerPermit {
                breaker: self,
                probe: false,
                finished: false,
            }),
            BreakerState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Ok(BreakerPermit {
                    breaker: self,
                    probe: true,
                    finished: false,
                })
            }
            _ => {
                inner.rejected_count += 1;
                Err(NorthboundError::CircuitOpen {
                    retry_after: inner.retry_after(&self.config, now),
                })
            }
        }
    }

    /// 在熔断保护下执行异步调用。
    pub async fn call<T, F>(&self, fut: F) -> Result<T, NorthboundError>
    where
        F: Future<Output = Result<T, NorthboundError>>,
    {
        let permit = self.acquire()?;
        let result = fut.await;
        permit.finish(result.is_ok());
        result
    }

    fn record(&self, ok: bool, probe: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if probe {
            inner.probe_in_flight = false;
        }
        if ok {
            inner.success_count += 1;
            if inner.state == BreakerState::HalfOpen {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failures.clear();
                    inner.half_open_successes = 0;
                }
            }
            return;
        }

        inner.failure_count += 1;
        inner.last_failure = Some(now);
        inner.failures.push_back(now);
        inner.prune(&self.config, now);
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.half_open_successes = 0;
            }
            BreakerState::Closed if inner.failures.len() >= self.config.failure_threshold => {
                inner.state = BreakerState::Open;
            }
            _ => {}
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::new();
    }

    pub fn stats(&self) -> BreakerStats {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.refresh(&self.config, now);
        let total = inner.failure_count + inner.success_count;
        let failure_rate = if total == 0 {
            0.0
        } else {
            inner.failure_count as f64 / total as f64
        };
        let retry_after = if inner.state == BreakerState::Open {
            inner.retry_after(&self.config, now)
        } else {
            Duration::ZERO
        };
        BreakerStats {
            state: inner.state,
            request_count: inner.request_count,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            rejected_count: inner.rejected_count,
            failure_rate,
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> Result<(), NorthboundError> {
        Err(NorthboundError::Transport("down".to_string()))
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            let err = breaker.call(async { fail() }).await.unwrap_err();
            assert!(!err.is_circuit_open());
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = breaker.call(async { Ok(()) }).await.unwrap_err();
        match err {
            NorthboundError::CircuitOpen { retry_after } => {
                assert!(retry_after > Duration::from_secs(25));
                assert!(retry_after <= Duration::from_secs(30));
            }
            other => panic!("unexpected error: {other}"),
        }
        let stats = breaker.stats();
        assert_eq!(stats.failure_count, 5);
        assert_eq!(stats.rejected_count, 1);
    }

    #[tokio::test]
    async fn failures_outside_window_do_not_open() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 2,
            failure_window: Duration::from_millis(30),
            ..BreakerConfig::default()
        });
        let _ = breaker.call(async { fail() }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = breaker.call(async { fail() }).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn zero_recovery_admits_probe_and_closes_after_successes() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::ZERO,
            ..BreakerConfig::default()
        });
        let _ = breaker.call(async { fail() }).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        for _ in 0..2 {
            breaker.call(async { Ok(()) }).await.expect("probe");
            assert_eq!(breaker.state(), BreakerState::HalfOpen);
        }
        breaker.call(async { Ok(()) }).await.expect("probe");
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(20),
            ..BreakerConfig::default()
        });
        let _ = breaker.call(async { fail() }).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        let _ = breaker.call(async { fail() }).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_admits_a_single_probe() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::ZERO,
            ..BreakerConfig::default()
        });
        breaker.acquire().expect("closed").finish(false);

        let probe = breaker.acquire().expect("probe");
        assert!(breaker.acquire().is_err());
        drop(probe);
        assert!(breaker.acquire().is_ok());
    }

    #[tokio::test]
    async fn reset_closes_and_clears_counters() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        });
        let _ = breaker.call(async { fail() }).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker.reset();
        let stats = breaker.stats();
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.failure_count, 0);
    }
}
