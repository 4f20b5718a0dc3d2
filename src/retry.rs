//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient fetch
//! failures. It implements exponential backoff with optional jitter to
//! prevent thundering herd against a rate-limited remote service.
//!
//! Backoff sleeps are per-worker and never block other workers. The
//! cancellation token is checked between attempts, so a cancelled run stops
//! within one backoff interval; the in-flight operation itself is allowed to
//! run to natural completion.

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (rate limiting, network timeouts, server errors)
/// should return `true`. Permanent failures (object not found, permission
/// denied, authorization rejected) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimited | FetchError::TransientNetwork(_) => true,
            // Permanent per-task failures
            FetchError::NotFound | FetchError::PermissionDenied => false,
            // Fatal to the whole run, retrying cannot help
            FetchError::Unauthorized => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// `max_attempts` counts total attempts, including the first. Between
/// attempts the backoff sleep races the cancellation token; when the token
/// fires mid-backoff the last error is returned without further attempts.
///
/// # Arguments
///
/// * `config` - Retry configuration (attempt budget, delays, multiplier, jitter)
/// * `cancel` - Cancellation token checked between attempts
/// * `operation` - Async closure returning `Result<T, E>` where E implements [`IsRetryable`]
///
/// # Returns
///
/// The successful result, or the last error once the budget is exhausted,
/// the error is permanent, or the run is cancelled.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt: u32 = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Cancellation requested during backoff, abandoning retries");
                        return Err(e);
                    }
                    _ = tokio::time::sleep(jittered_delay) => {}
                }

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay is between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn success_calls_operation_once() {
        let config = fast_config(3);
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&config, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn transient_error_retries_then_succeeds() {
        let config = fast_config(3);
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&config, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(FetchError::TransientNetwork("reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "should fail twice before success"
        );
    }

    #[tokio::test]
    async fn budget_counts_total_attempts() {
        let config = fast_config(3);
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&config, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(FetchError::RateLimited)
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), FetchError::RateLimited);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "max_attempts=3 means exactly 3 attempts total"
        );
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let config = fast_config(5);
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&config, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(FetchError::NotFound)
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), FetchError::NotFound);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry permanent error"
        );
    }

    #[tokio::test]
    async fn unauthorized_is_never_retried() {
        let config = fast_config(5);
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&config, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(FetchError::Unauthorized)
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), FetchError::Unauthorized);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_returns_last_error() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let cancel_after_first = cancel.clone();
        let start = std::time::Instant::now();

        let result = retry_with_backoff(&config, &cancel, || {
            let counter = counter_clone.clone();
            let cancel = cancel_after_first.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Cancel once the first attempt fails; the 30s backoff must
                // not be served.
                cancel.cancel();
                Err::<i32, _>(FetchError::TransientNetwork("timeout".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::TransientNetwork(_))));
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "no second attempt after cancellation"
        );
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "backoff sleep must be interrupted by cancellation, took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn backoff_delays_increase_exponentially() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let cancel = CancellationToken::new();

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _result = retry_with_backoff(&config, &cancel, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err::<i32, _>(FetchError::RateLimited)
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 4, "4 attempts total");

        let gap1 = ts[1].duration_since(ts[0]);
        let gap2 = ts[2].duration_since(ts[1]);
        let gap3 = ts[3].duration_since(ts[2]);

        assert!(gap1 >= Duration::from_millis(40), "first delay ~50ms, was {gap1:?}");
        assert!(gap2 >= Duration::from_millis(80), "second delay ~100ms, was {gap2:?}");
        assert!(gap3 >= Duration::from_millis(160), "third delay ~200ms, was {gap3:?}");
    }

    #[tokio::test]
    async fn delays_are_capped_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 10.0,
            jitter: false,
        };
        let cancel = CancellationToken::new();

        let start = std::time::Instant::now();
        let _result = retry_with_backoff(&config, &cancel, || async {
            Err::<i32, _>(FetchError::RateLimited)
        })
        .await;

        // Delays: 50ms + 100ms + 100ms = 250ms, generous upper bound for CI
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");
    }

    #[test]
    fn add_jitter_stays_within_bounds_over_many_iterations() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(
                jittered >= delay,
                "iteration {i}: jittered {jittered:?} < base delay {delay:?}"
            );
            assert!(
                jittered <= delay * 2 + Duration::from_millis(1),
                "iteration {i}: jittered {jittered:?} > 2x base delay"
            );
        }
    }

    #[test]
    fn retryable_classification_matches_taxonomy() {
        assert!(FetchError::RateLimited.is_retryable());
        assert!(FetchError::TransientNetwork("timeout".into()).is_retryable());
        assert!(!FetchError::NotFound.is_retryable());
        assert!(!FetchError::PermissionDenied.is_retryable());
        assert!(!FetchError::Unauthorized.is_retryable());
    }
}
