//! Bounded retry with exponential backoff for single-store operations.

use crate::config::RetryConfig;
use crate::error::Result;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy applied to every store call.
///
/// The wait before retry `n` is `multiplier * 2^(n-1)` seconds clamped to
/// `[min_delay, max_delay]`. Only errors reporting [`Error::is_transient`]
/// are retried; everything else is returned after the first attempt.
///
/// [`Error::is_transient`]: crate::error::Error::is_transient
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    multiplier: f64,
    min_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, multiplier: f64, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            multiplier,
            min_delay,
            max_delay,
        }
    }

    /// Policy that retries without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0.0, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.multiplier,
            config.min_delay(),
            config.max_delay(),
        )
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: Duration::from_secs_f64(self.multiplier),
            initial_interval: Duration::from_secs_f64(self.multiplier),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delays slept between consecutive attempts
    pub fn delays(&self) -> Vec<Duration> {
        let mut backoff = self.backoff();
        (1..self.max_attempts)
            .map(|_| self.clamp(backoff.next_backoff()))
            .collect()
    }

    fn clamp(&self, delay: Option<Duration>) -> Duration {
        delay
            .unwrap_or(self.max_delay)
            .max(self.min_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 1u32;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.clamp(backoff.next_backoff());
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    metrics::counter!("photoapp.retries").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(operation, attempts = attempt, error = %e, "Retry budget exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Store};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient(n: u32) -> Error {
        Error::Transient {
            store: Store::Database,
            message: format!("attempt {} timed out", n),
        }
    }

    #[test]
    fn test_default_delay_schedule() {
        let policy = RetryPolicy::new(6, 1.0, Duration::from_secs(2), Duration::from_secs(30));
        let secs: Vec<u64> = policy.delays().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![2, 2, 4, 8, 16]);
    }

    #[test]
    fn test_delays_are_capped() {
        let policy = RetryPolicy::new(10, 1.0, Duration::from_secs(2), Duration::from_secs(30));
        assert!(policy.delays().iter().all(|d| *d <= Duration::from_secs(30)));
        assert_eq!(policy.delays().last(), Some(&Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let started = tokio::time::Instant::now();
        let result = policy
            .run("flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(transient(n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_surfaces_last_error_after_budget() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let err = policy
            .run("down", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(transient(n))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), "database unavailable: attempt 3 timed out");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let err = policy
            .run("lookup", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::not_found("user", 42))
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
