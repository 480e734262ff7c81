//! Retry policy for executors that call external services.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter.
///
/// Only transient failures are retried. The scheduler never sleeps past the
/// execution deadline: if the next delay would cross it, the last error is
/// final.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    /// Fractional spread applied to each delay, e.g. 0.2 for ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::external()
    }
}

impl RetryPolicy {
    /// The policy used for AI and automation calls.
    #[must_use]
    pub const fn external() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            factor: 2,
            jitter: 0.2,
        }
    }

    /// Returns true if another attempt may follow `attempt` (1-based).
    #[must_use]
    pub const fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt`, without jitter.
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(exponent))
    }

    /// Delay before the attempt following `attempt`, with jitter applied.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let spread = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        nominal.mul_f64(spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        let policy = RetryPolicy::external();
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(200));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(400));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::external();
        for _ in 0..100 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(319), "{delay:?}");
            assert!(delay <= Duration::from_millis(481), "{delay:?}");
        }
    }

    #[test]
    fn three_attempts_in_total() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(2));
        assert!(!policy.allows_retry_after(3));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::external()
        };
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }
}
