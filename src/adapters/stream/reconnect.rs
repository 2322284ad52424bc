//! Reconnect and per-command retry policy for the broker connection.

use std::time::Duration;

use crate::config::RedisConfig;

/// Linear backoff capped at a maximum, with an optional retry ceiling.
///
/// `delay(n) = min(n * step, max)` for the n-th consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    step: Duration,
    max: Duration,
    max_retries_per_request: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(step: Duration, max: Duration, max_retries_per_request: Option<u32>) -> Self {
        Self {
            step,
            max,
            max_retries_per_request,
        }
    }

    pub fn from_config(config: &RedisConfig) -> Self {
        Self::new(
            config.retry_step(),
            config.retry_max(),
            config.retries_per_request(),
        )
    }

    /// Delay before the retry following the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.max)
    }

    /// Whether a command that has failed `failures` times may be retried.
    pub fn may_retry(&self, failures: u32) -> bool {
        match self.max_retries_per_request {
            None => true,
            Some(ceiling) => failures <= ceiling,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&RedisConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(ceiling: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(50), Duration::from_millis(2000), ceiling)
    }

    #[test]
    fn delay_grows_linearly_then_caps() {
        let p = policy(Some(20));
        assert_eq!(p.delay(1), Duration::from_millis(50));
        assert_eq!(p.delay(4), Duration::from_millis(200));
        assert_eq!(p.delay(40), Duration::from_millis(2000));
        assert_eq!(p.delay(1_000), Duration::from_millis(2000));
    }

    #[test]
    fn ceiling_limits_retries() {
        let p = policy(Some(2));
        assert!(p.may_retry(1));
        assert!(p.may_retry(2));
        assert!(!p.may_retry(3));
    }

    #[test]
    fn zero_ceiling_never_retries() {
        assert!(!policy(Some(0)).may_retry(1));
    }

    #[test]
    fn unlimited_always_retries() {
        assert!(policy(None).may_retry(u32::MAX));
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_max(
            step in 0u64..10_000,
            max in 0u64..60_000,
            attempt in 0u32..100_000,
        ) {
            let p = ReconnectPolicy::new(
                Duration::from_millis(step),
                Duration::from_millis(max),
                None,
            );
            prop_assert!(p.delay(attempt) <= Duration::from_millis(max));
        }

        #[test]
        fn delay_is_monotonic(step in 0u64..10_000, attempt in 0u32..100_000) {
            let p = ReconnectPolicy::new(
                Duration::from_millis(step),
                Duration::from_secs(30),
                None,
            );
            prop_assert!(p.delay(attempt) <= p.delay(attempt.saturating_add(1)));
        }
    }
}
