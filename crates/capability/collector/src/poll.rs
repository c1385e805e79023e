//! 单设备轮询节奏：采集周期、资源打开失败退避、历史写入节流。

use std::time::{Duration, Instant};

/// 连续资源打开失败达到该次数后进入退避
pub const OPEN_FAILURE_LIMIT: u32 = 3;
/// 退避上限
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// 一次采集的结果类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Success,
    ResourceOpenFailed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PollState {
    interval: Duration,
    last_started: Option<Instant>,
    open_failures: u32,
    backoff_until: Option<Instant>,
}

impl PollState {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_started: None,
            open_failures: 0,
            backoff_until: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 距离下一次采集的等待时间；错过的周期不补采。
    pub fn next_delay(&self, now: Instant) -> Duration {
        let due = match self.last_started {
            Some(started) => started + self.interval,
            None => now,
        };
        let due = match self.backoff_until {
            Some(until) if until > due => until,
            _ => due,
        };
        due.saturating_duration_since(now)
    }

    pub fn mark_started(&mut self, now: Instant) {
        self.last_started = Some(now);
    }

    /// 记录结果；返回本次是否进入退避。
    pub fn record(&mut self, outcome: PollOutcome, now: Instant) -> Option<Duration> {
        match outcome {
            PollOutcome::Success => {
                self.open_failures = 0;
                self.backoff_until = None;
                None
            }
            PollOutcome::Failed => {
                self.open_failures = 0;
                None
            }
            PollOutcome::ResourceOpenFailed => {
                self.open_failures += 1;
                if self.open_failures < OPEN_FAILURE_LIMIT {
                    return None;
                }
                let backoff = backoff_for(self.interval);
                self.backoff_until = Some(now + backoff);
                Some(backoff)
            }
        }
    }

    pub fn in_backoff(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| until > now)
    }
}

pub fn backoff_for(interval: Duration) -> Duration {
    (interval * 10).min(MAX_BACKOFF)
}

/// 历史写入节流：从未写过或距上次写入已达 `storage_interval` 时写入，0 表示每次写入。
pub fn should_store_history(
    last_stored_ms: Option<i64>,
    collected_at_ms: i64,
    storage_interval: Duration,
) -> bool {
    let Some(last) = last_stored_ms else {
        return true;
    };
    if storage_interval.is_zero() {
        return true;
    }
    collected_at_ms.saturating_sub(last) >= storage_interval.as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_is_immediate_then_waits_interval() {
        let now = Instant::now();
        let mut state = PollState::new(Duration::from_secs(1));
        assert_eq!(state.next_delay(now), Duration::ZERO);
        state.mark_started(now);
        assert_eq!(state.next_delay(now), Duration::from_secs(1));
        assert_eq!(state.next_delay(now + Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn three_open_failures_back_off() {
        let now = Instant::now();
        let mut state = PollState::new(Duration::from_secs(1));
        assert_eq!(state.record(PollOutcome::ResourceOpenFailed, now), None);
        assert_eq!(state.record(PollOutcome::ResourceOpenFailed, now), None);
        assert_eq!(
            state.record(PollOutcome::ResourceOpenFailed, now),
            Some(Duration::from_secs(10))
        );
        assert!(state.in_backoff(now));
        state.mark_started(now);
        assert_eq!(state.next_delay(now), Duration::from_secs(10));

        state.record(PollOutcome::Success, now);
        assert!(!state.in_backoff(now));
        assert_eq!(state.next_delay(now), Duration::from_secs(1));
    }

    #[test]
    fn other_failures_reset_open_streak() {
        let now = Instant::now();
        let mut state = PollState::new(Duration::from_secs(1));
        state.record(PollOutcome::ResourceOpenFailed, now);
        state.record(PollOutcome::ResourceOpenFailed, now);
        state.record(PollOutcome::Failed, now);
        assert_eq!(state.record(PollOutcome::ResourceOpenFailed, now), None);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_for(Duration::from_millis(100)), Duration::from_secs(1));
        assert_eq!(backoff_for(Duration::from_secs(30)), MAX_BACKOFF);
    }

    #[test]
    fn history_throttle() {
        let interval = Duration::from_secs(60);
        assert!(should_store_history(None, 1_000, interval));
        assert!(!should_store_history(Some(1_000), 30_000, interval));
        assert!(should_store_history(Some(1_000), 61_000, interval));
        assert!(should_store_history(Some(1_000), 1_001, Duration::ZERO));
    }
}
