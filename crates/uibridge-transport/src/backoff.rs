//! Retry state machine.
//!
//! [`Backoff`] only computes delays; callers own the sleeping. That keeps the
//! policy testable without timers and lets the connection task race the delay
//! against other work.

use std::time::Duration;

use crate::config::RetryPolicy;

/// Exponential backoff over a bounded number of attempts.
///
/// ```rust
/// use std::time::Duration;
/// use uibridge_transport::RetryPolicy;
///
/// let policy = RetryPolicy::default()
///     .with_max_attempts(4)
///     .with_delays(Duration::from_millis(100), Duration::from_millis(300));
/// let mut backoff = policy.backoff();
///
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(300)));
/// assert_eq!(backoff.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    jitter_factor: f64,
    failures: u32,
}

impl Backoff {
    /// Start a state machine for `policy`.
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            base: policy.base_delay(),
            cap: policy.max_delay(),
            max_attempts: policy.max_attempts.max(1),
            jitter_factor: policy.jitter_factor.clamp(0.0, 1.0),
            failures: 0,
        }
    }

    /// Failures recorded since the last reset.
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Total attempts allowed.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed.
    pub const fn has_remaining(&self) -> bool {
        self.failures < self.max_attempts
    }

    /// `min(base * 2^attempt, cap)`, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_attempts {
            return None;
        }
        Some(self.jittered(self.delay_for(self.failures - 1)))
    }

    /// Forget recorded failures after a successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 {
            return delay;
        }
        let jitter = 1.0 + (fastrand::f64() - 0.5) * 2.0 * self.jitter_factor;
        delay.mul_f64(jitter).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(attempts: u32, base_ms: u64, cap_ms: u64) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_delays(Duration::from_millis(base_ms), Duration::from_millis(cap_ms))
    }

    #[test]
    fn test_doubles_until_cap() {
        let backoff = policy(10, 100, 1_000).backoff();
        let delays: Vec<u64> = (0..6)
            .map(|n| backoff.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, [100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_budget_counts_first_attempt() {
        let mut backoff = policy(3, 10, 1_000).backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.failures(), 3);
        assert!(!backoff.has_remaining());
    }

    #[test]
    fn test_single_attempt_never_delays() {
        let mut backoff = RetryPolicy::no_retry().backoff();
        assert_eq!(backoff.next_delay(), None);

        let mut zero = policy(0, 10, 10).backoff();
        assert_eq!(zero.max_attempts(), 1);
        assert_eq!(zero.next_delay(), None);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = policy(5, 50, 1_000).backoff();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let backoff = policy(u32::MAX, 100, 5_000).backoff();
        assert_eq!(backoff.delay_for(64), Duration::from_millis(5_000));
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_under_cap(
            base in 1u64..500,
            cap in 1u64..5_000,
            jitter in 0.0f64..1.0,
            failures in 1u32..20,
        ) {
            let mut p = policy(failures + 1, base, cap);
            p.jitter_factor = jitter;
            let mut backoff = p.backoff();
            for _ in 0..failures {
                let delay = backoff.next_delay().unwrap();
                prop_assert!(delay <= Duration::from_millis(cap));
            }
            prop_assert_eq!(backoff.next_delay(), None);
        }
    }
}
