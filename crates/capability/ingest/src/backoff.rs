//! 重连退避：指数增长、有上限，带随机抖动。

use rand_core::{OsRng, RngCore};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// 未加抖动的第 `attempt` 次等待（从 1 开始）。
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// 下一次等待，落在 [ceiling/2, ceiling] 内。
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        with_jitter(self.ceiling(self.attempt), OsRng.next_u64())
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 连接成功后归零。
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn with_jitter(ceiling: Duration, sample: u64) -> Duration {
    let ceiling_ms = ceiling.as_millis().min(u128::from(u64::MAX)) as u64;
    let half = ceiling_ms / 2;
    let spread = ceiling_ms - half;
    let jitter = sample.checked_rem(spread.saturating_add(1)).unwrap_or(0);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_doubles_until_cap() {
        let backoff = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_millis(700));
        assert_eq!(backoff.ceiling(1), Duration::from_millis(100));
        assert_eq!(backoff.ceiling(3), Duration::from_millis(400));
        assert_eq!(backoff.ceiling(4), Duration::from_millis(700));
        assert_eq!(backoff.ceiling(64), Duration::from_millis(700));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let ceiling = Duration::from_millis(1000);
        assert_eq!(with_jitter(ceiling, 0), Duration::from_millis(500));
        assert_eq!(with_jitter(ceiling, 500), Duration::from_millis(1000));
        assert_eq!(with_jitter(ceiling, 501), Duration::from_millis(500));

        let mut backoff = ReconnectBackoff::new(Duration::from_millis(50), Duration::from_secs(1));
        for _ in 0..20 {
            let delay = backoff.next_delay();
            let ceiling = backoff.ceiling(backoff.attempt());
            assert!(delay >= ceiling / 2 && delay <= ceiling);
        }
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }
}
