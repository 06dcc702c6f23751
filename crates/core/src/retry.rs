//! Retry policy for failed render jobs.

use std::time::Duration;

use crate::RenderFailureKind;

/// Explicit retry/backoff policy applied to failed render jobs.
///
/// Passed into the job state machine rather than buried in queue
/// configuration so the schedule is testable in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (not just retries).
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Factor applied per consecutive failure.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    /// 3 attempts, backing off 5s / 25s / 125s.
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(5), multiplier: 5 }
    }
}

impl RetryPolicy {
    /// Whether another attempt should be scheduled after `failures`
    /// consecutive failures, the latest of the given kind.
    ///
    /// Permanent failures (e.g. unrenderable content) are never retried.
    pub fn should_retry(&self, failures: u32, kind: RenderFailureKind) -> bool {
        kind.is_transient() && failures < self.max_attempts
    }

    /// Delay to wait before the attempt following the `failures`-th failure.
    ///
    /// `failures` is 1-based: the first failure waits `base_delay`, each
    /// subsequent failure multiplies by `multiplier`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1);
        self.base_delay * self.multiplier.saturating_pow(exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(25));
        assert_eq!(policy.backoff(3), Duration::from_secs(125));
    }

    #[test]
    fn test_retry_exhaustion() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1, RenderFailureKind::Timeout));
        assert!(policy.should_retry(2, RenderFailureKind::Crash));
        assert!(!policy.should_retry(3, RenderFailureKind::Timeout));
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(1, RenderFailureKind::BadContent));
    }
}
