//! Retry logic with exponential backoff for remote cache requests

use crate::config::RetryConfig;
use crate::error::{RemoteError, Result};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retries for transient failures.
///
/// Deterministic failures (not found, auth, payment, malformed payloads) are
/// returned on the first attempt. A transient failure that outlives every
/// attempt is wrapped in [`RemoteError::RetryExhausted`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Policy driven by `config`
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy that makes exactly one attempt
    #[must_use]
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        })
    }

    /// The configuration this policy was built from
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f` until it succeeds, fails deterministically or attempts run out
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut backoff = create_backoff(&self.config);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let err = match f().await {
                Ok(result) => {
                    if attempts > 1 {
                        debug!(
                            operation = operation_name,
                            attempts = attempts,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                debug!(
                    operation = operation_name,
                    error = %err,
                    "Error is not retryable, failing immediately"
                );
                return Err(err);
            }

            if attempts >= max_attempts {
                warn!(
                    operation = operation_name,
                    attempts = attempts,
                    error = %err,
                    "Operation failed after maximum retries"
                );
                return Err(RemoteError::retry_exhausted(operation_name, attempts, err));
            }

            let Some(duration) = backoff.next_backoff() else {
                return Err(RemoteError::retry_exhausted(operation_name, attempts, err));
            };
            debug!(
                operation = operation_name,
                attempts = attempts,
                error = %err,
                retry_in_ms = duration.as_millis(),
                "Operation failed, retrying"
            );
            tokio::time::sleep(duration).await;
        }
    }
}

/// Create exponential backoff from config
fn create_backoff(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.initial_backoff_ms))
        .with_max_interval(Duration::from_millis(config.max_backoff_ms))
        .with_multiplier(config.backoff_multiplier)
        .with_max_elapsed_time(None) // We use max_attempts instead
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            backoff_multiplier: 2.0,
        })
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let result = RetryPolicy::default()
            .run("test", move || {
                let cc = call_count_clone.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RemoteError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failure() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let result = fast(3)
            .run("test", move || {
                let cc = call_count_clone.clone();
                async move {
                    let count = cc.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(RemoteError::unexpected_status("test", 503, "unavailable"))
                    } else {
                        Ok::<_, RemoteError>(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_keeps_last_error() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let result = fast(2)
            .run("test", move || {
                let cc = call_count_clone.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(RemoteError::timeout("test"))
                }
            })
            .await;

        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        let err = result.unwrap_err();
        assert!(matches!(err, RemoteError::RetryExhausted { attempts: 2, .. }));
        assert!(matches!(err.root(), RemoteError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_deterministic_errors_are_not_retried() {
        for err in [
            RemoteError::not_found("test"),
            RemoteError::Unauthorized {
                operation: "test".into(),
            },
            RemoteError::PaymentRequired {
                operation: "test".into(),
            },
        ] {
            let call_count = Arc::new(AtomicUsize::new(0));
            let call_count_clone = call_count.clone();
            let err = Arc::new(parking_lot::Mutex::new(Some(err)));

            let result = fast(3)
                .run("test", move || {
                    let cc = call_count_clone.clone();
                    let err = err.clone();
                    async move {
                        cc.fetch_add(1, Ordering::SeqCst);
                        Err::<i32, _>(err.lock().take().unwrap())
                    }
                })
                .await;

            assert!(!matches!(result, Err(RemoteError::RetryExhausted { .. })));
            assert_eq!(call_count.load(Ordering::SeqCst), 1);
        }
    }
}
