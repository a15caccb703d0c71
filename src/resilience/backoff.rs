//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::schema::RetryConfig;

/// Calculate exponential backoff delay with jitter.
///
/// Attempt 0 is immediate; attempt `n` waits `base * 2^(n-1)`, capped at
/// `max_ms`, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Retry schedule for one kind of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 never gives up.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delay before retrying after `failures` failed attempts.
    pub fn delay(&self, failures: u32) -> Duration {
        calculate_backoff(failures, self.base_delay_ms, self.max_delay_ms)
    }

    /// Whether a job that failed `failures` times should be abandoned.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            max_attempts: config.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);

        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 110);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000 && max.as_millis() < 1100);
    }

    #[test]
    fn test_large_attempt_saturates() {
        let delay = calculate_backoff(200, u64::MAX / 2, 5_000);
        assert!(delay.as_millis() < 5_500);
    }

    #[test]
    fn test_policy_exhaustion() {
        let forever = RetryPolicy::from(&RetryConfig::default());
        assert!(!forever.exhausted(1_000_000));

        let bounded = RetryPolicy {
            base_delay_ms: 10,
            max_delay_ms: 100,
            max_attempts: 3,
        };
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));
        assert!(bounded.delay(1) >= Duration::from_millis(10));
    }
}
