//! 容量清理节流。

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// 每 `every` 次写入或距上次清理超过 `min_interval` 时放行一次。
pub struct CleanupThrottle {
    every: u64,
    min_interval: Duration,
    state: Mutex<ThrottleState>,
}

struct ThrottleState {
    writes: u64,
    last_run: Instant,
}

impl CleanupThrottle {
    pub fn new(every: u64, min_interval: Duration) -> Self {
        Self {
            every: every.max(1),
            min_interval,
            state: Mutex::new(ThrottleState {
                writes: 0,
                last_run: Instant::now(),
            }),
        }
    }

    /// 记录一次写入，返回本次是否应执行清理。
    pub fn should_run(&self) -> bool {
        let mut state = self.state.lock();
        state.writes += 1;
        if state.writes >= self.every || state.last_run.elapsed() >= self.min_interval {
            state.writes = 0;
            state.last_run = Instant::now();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_every_n_writes() {
        let throttle = CleanupThrottle::new(3, Duration::from_secs(3600));
        let runs: Vec<bool> = (0..6).map(|_| throttle.should_run()).collect();
        assert_eq!(runs, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn runs_after_interval() {
        let throttle = CleanupThrottle::new(1000, Duration::ZERO);
        assert!(throttle.should_run());
        assert!(throttle.should_run());
    }
}
