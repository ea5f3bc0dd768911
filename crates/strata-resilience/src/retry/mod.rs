//! Retry policy implementation.

use std::time::Duration;
use strata_config::RetryConfig;
use tracing::debug;

/// Retry policy with linear backoff: attempt `n` waits `n * step`, capped
/// at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay unit.
    pub step: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_millis(100),
            max_delay: Duration::from_millis(3000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            step: Duration::from_millis(config.step_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay before the given retry attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        self.step.saturating_mul(attempt).min(self.max_delay)
    }

    /// Executes a function with retry logic.
    ///
    /// Stops after `max_attempts` and returns the last error.
    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts.max(1) {
                        debug!("Giving up after {} attempts: {}", attempt, e);
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    debug!("Attempt {} failed: {}; retrying in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_success() {
        let policy = RetryPolicy::default();
        let result: Result<i32, &str> = policy.execute(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_eventual_success() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, &str> = policy
            .execute(|| {
                let attempts = attempts_clone.clone();
                async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err("not yet")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_after_three_attempts() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, &str> = policy
            .execute(|| {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err("connection refused")
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "connection refused");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_linear_delay_matches_store_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(29), Duration::from_millis(2900));
        assert_eq!(policy.delay_for_attempt(45), Duration::from_millis(3000));
    }

    #[test]
    fn test_delay_saturates_at_cap() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            max_attempts: 5,
            step_ms: 50,
            max_delay_ms: 1000,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_retry_single_attempt() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 1,
            step_ms: 100,
            max_delay_ms: 3000,
        });
        let result: Result<i32, &str> = policy.execute(|| async { Err("fail") }).await;
        assert!(result.is_err());
    }
}
