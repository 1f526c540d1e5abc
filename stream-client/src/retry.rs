//! Reconnect backoff

use crate::config::ClientConfig;
use std::time::Duration;

/// Quadratic reconnect backoff bounded by a retry budget.
///
/// The delay before attempt `n` (counting from zero) is
/// `(n² + 1) × base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    budget: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(budget: u32, base_delay: Duration) -> Self {
        Self { budget, base_delay }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.retry_budget, config.retry_delay)
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = retry_count.saturating_mul(retry_count).saturating_add(1);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether another attempt is allowed after `retry_count` attempts
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.budget
    }

    /// Sum of every backoff delay the budget allows
    pub fn total_wait(&self) -> Duration {
        (0..self.budget).fold(Duration::ZERO, |total, count| {
            total.saturating_add(self.delay_for(count))
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 500)]
    #[case(1, 1_000)]
    #[case(2, 2_500)]
    #[case(3, 5_000)]
    #[case(9, 41_000)]
    fn test_delay_for(#[case] retry_count: u32, #[case] millis: u64) {
        let policy = RetryPolicy::new(10, Duration::from_millis(500));
        assert_eq!(policy.delay_for(retry_count), Duration::from_millis(millis));
    }

    #[test]
    fn test_budget_boundary() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_default_total_wait_is_a_few_minutes() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.budget(), 10);
        assert_eq!(policy.total_wait(), Duration::from_millis(147_500));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
    }
}
