//! Backoff schedule for feed fetch retries.
//!
//! Delays double from `base_delay_ms` up to `max_delay_ms`. Each delay uses
//! equal jitter: half is fixed, the other half is random, so several
//! instances restarting together do not hit a feed host in lockstep.

use std::time::Duration;

use rand::Rng;

/// Attempt count and delay bounds for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Upper bound of the wait after failed attempt `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Jittered wait after failed attempt `attempt`, in `[ceiling/2, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        let fixed = ceiling / 2;
        let spread = ceiling - fixed;
        let jitter = if spread > 0 {
            rand::thread_rng().gen_range(0..=spread)
        } else {
            0
        };
        Duration::from_millis(fixed + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: RetryPolicy = RetryPolicy {
        attempts: 5,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
    };

    #[test]
    fn ceiling_doubles_until_cap() {
        assert_eq!(POLICY.ceiling(0), Duration::ZERO);
        assert_eq!(POLICY.ceiling(1), Duration::from_millis(100));
        assert_eq!(POLICY.ceiling(3), Duration::from_millis(400));
        assert_eq!(POLICY.ceiling(5), Duration::from_millis(1_000));
        assert_eq!(POLICY.ceiling(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn delay_stays_within_half_and_full_ceiling() {
        for attempt in 1..8 {
            let ceiling = POLICY.ceiling(attempt);
            for _ in 0..20 {
                let d = POLICY.delay(attempt);
                assert!(d >= ceiling / 2 && d <= ceiling, "attempt {attempt}: {d:?}");
            }
        }
    }
}
