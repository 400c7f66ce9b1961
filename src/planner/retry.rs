//! Retry with exponential backoff for control plane calls.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExecutionConfig;
use crate::error::ConvoyError;

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

/// Outcome of a retried call that did not succeed.
#[derive(Debug)]
pub struct RetryFailure {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// The last error seen.
    pub error: ConvoyError,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl RetryPolicy {
    /// Builds the policy from the `execution` section.
    #[must_use]
    pub const fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Maximum number of attempts, the first one included.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay to wait after `error`: the backoff, or the server's hint if longer.
    #[must_use]
    pub fn delay_for(&self, retry: u32, error: &ConvoyError) -> Duration {
        let backoff = self.backoff(retry);
        error.retry_after().map_or(backoff, |hint| hint.max(backoff))
    }

    /// Runs `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error together with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<(T, u32), RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if error.is_transient() && attempt < self.max_attempts() => {
                    let delay = self.delay_for(attempt - 1, &error);
                    warn!(
                        "{label}: attempt {attempt}/{} failed ({error}), retrying in {delay:?}",
                        self.max_attempts()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    debug!("{label}: giving up after {attempt} attempt(s)");
                    return Err(RetryFailure { attempts: attempt, error });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(2), Duration::from_millis(300));
        assert_eq!(p.backoff(40), Duration::from_millis(300));
    }

    #[test]
    fn test_retry_after_wins_when_longer() {
        let p = policy();
        let throttled = ConvoyError::from(RemoteError::RateLimited { retry_after_secs: 2 });
        assert_eq!(p.delay_for(0, &throttled), Duration::from_secs(2));

        let timeout = ConvoyError::from(RemoteError::timeout("slow"));
        assert_eq!(p.delay_for(0, &timeout), Duration::from_millis(100));
    }

    #[test]
    fn test_default_matches_execution_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts(), 4);
        assert_eq!(p.base_delay, Duration::from_millis(500));
        assert_eq!(p.max_delay, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_makes_four_attempts() {
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let failure = policy()
            .run("service/s1", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConvoyError::from(RemoteError::timeout("slow")))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(failure.error.is_transient());
        // 100 + 200 + 300
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = &AtomicU32::new(0);

        let failure = policy()
            .run("service/s1", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConvoyError::from(RemoteError::rejected(400, "bad")))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_errors() {
        let calls = &AtomicU32::new(0);

        let (value, attempts) = policy()
            .run("service/s1", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ConvoyError::from(RemoteError::network("reset")))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!((value, attempts), (7, 3));
    }
}
