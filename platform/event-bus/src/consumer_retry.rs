//! Bounded retry with backoff
//!
//! Used at startup to wait for the broker and the store to become reachable,
//! and anywhere else a fallible async operation deserves a few more attempts
//! before its error is surfaced.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff before the second attempt (doubles on each retry)
    pub initial_backoff: Duration,
    /// Cap on the backoff; equal to `initial_backoff` for a fixed delay
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Bounded attempts with the same delay between each of them
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: delay,
            max_backoff: delay,
        }
    }
}

/// Retry a fallible async operation with backoff
///
/// # Arguments
/// * `operation` - Factory producing a fresh attempt each call
/// * `config` - Retry configuration
/// * `context` - Context string for logging (e.g., "connect_nats")
///
/// # Returns
/// * `Ok(T)` if an attempt succeeds within `max_attempts`
/// * `Err(E)` from the last attempt once attempts are exhausted
///
/// # Example
/// ```rust
/// use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), String> {
/// let config = RetryConfig::fixed(10, Duration::from_secs(2));
/// let value = retry_with_backoff(
///     || async { Ok::<_, String>(42) },
///     &config,
///     "example_operation"
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Send,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        context = %context,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    context = %context,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Operation failed, retrying with backoff"
                );

                sleep(backoff).await;

                backoff = std::cmp::min(backoff * 2, config.max_backoff);
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
    async fn test_retry_succeeds_first_attempt() {
        let result =
            retry_with_backoff(|| async { Ok::<_, String>(42) }, &RetryConfig::default(), "test")
                .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::fixed(5, Duration::from_millis(5));

        let result = retry_with_backoff(
            || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("not ready ({})", n))
                    } else {
                        Ok("connected")
                    }
                }
            },
            &config,
            "test",
        )
        .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::fixed(2, Duration::from_millis(5));

        let result = retry_with_backoff(
            || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(format!("attempt {}", n))
                }
            },
            &config,
            "test",
        )
        .await;

        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_does_not_grow() {
        let config = RetryConfig::fixed(4, Duration::from_millis(10));
        assert_eq!(config.initial_backoff, config.max_backoff);

        let start = tokio::time::Instant::now();
        let _ = retry_with_backoff(|| async { Err::<(), _>("down") }, &config, "test").await;

        // Three sleeps of 10ms each; exponential growth would take 70ms
        assert_eq!(start.elapsed(), Duration::from_millis(30));
    }

    #[test]
    fn test_fixed_requires_at_least_one_attempt() {
        assert_eq!(RetryConfig::fixed(0, Duration::ZERO).max_attempts, 1);
    }
}
