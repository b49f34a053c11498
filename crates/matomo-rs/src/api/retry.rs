//! Retry policy for tracking delivery.
//!
//! Delivery failures (non-2xx status, connection errors) are retried with a
//! linear backoff: the wait before retry `n` (1-based) is `base_delay * n`.
//! Construction failures and response-shape problems are never retried.

use crate::error::{ErrorKind, MatomoError};
use std::time::Duration;

/// Default number of retries after the first delivery attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base delay between delivery attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = one attempt, then fail).
    pub max_retries: u32,
    /// Delay unit; the wait grows by this amount on every retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given number of retries and the default delay.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }

    /// Whether another attempt is allowed after failed attempt `attempt`.
    pub fn should_retry(&self, attempt: u32, error: &MatomoError) -> bool {
        attempt < self.max_retries && is_delivery_failure(error)
    }
}

/// Whether an error is a delivery-class failure worth another attempt.
pub fn is_delivery_failure(error: &MatomoError) -> bool {
    error.kind() == ErrorKind::TransportError
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(300));
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn with_retries_sets_count() {
        let policy = RetryPolicy::with_retries(5);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay, DEFAULT_RETRY_DELAY);
    }

    #[test]
    fn delay_grows_linearly() {
        let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(50));
    }

    #[test]
    fn retries_only_delivery_failures() {
        let policy = RetryPolicy::with_retries(2);
        let http = MatomoError::transport("Matomo tracking HTTP error: 503").with_status(503);
        let invalid = MatomoError::validation("bad shape");

        assert!(policy.should_retry(0, &http));
        assert!(policy.should_retry(1, &http));
        assert!(!policy.should_retry(2, &http));
        assert!(!policy.should_retry(0, &invalid));
        assert!(!policy.should_retry(0, &MatomoError::missing_field("siteId")));
    }
}
