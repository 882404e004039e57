//! Bounded exponential-backoff retry shared by the LLM gateway and search adapters.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{LlmError, SearchError};

/// An error that knows whether retrying the same request could succeed.
pub trait Retryable: std::fmt::Display {
    fn is_transient(&self) -> bool;

    /// Server-provided delay hint, in seconds.
    fn retry_after_secs(&self) -> Option<u64> {
        None
    }
}

impl Retryable for LlmError {
    fn is_transient(&self) -> bool {
        LlmError::is_transient(self)
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl Retryable for SearchError {
    fn is_transient(&self) -> bool {
        SearchError::is_transient(self)
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SearchError::QuotaExhausted {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Outcome of a retried operation: the value plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Execute an async operation with retry and exponential backoff.
///
/// Retries transient errors up to `config.max_attempts` total attempts.
/// Non-transient errors are returned immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<Attempted<T>, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(e) => {
                if !e.is_transient() || attempt >= max_attempts {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt - 1, &e);
                tracing::warn!(
                    attempt,
                    max = max_attempts,
                    backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Compute backoff delay, respecting server retry-after hints.
fn compute_backoff<E: Retryable>(config: &RetryConfig, attempt: u32, err: &E) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    match err.retry_after_secs() {
        Some(secs) => (secs * 1000).min(config.max_backoff_ms).max(computed),
        None => computed,
    }
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25%.
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap pseudo-random in [0, 1) for jitter.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 4,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1000);
        assert_eq!(compute_exponential_backoff(&config, 1), 2000);
        assert_eq!(compute_exponential_backoff(&config, 3), 8000);
        assert_eq!(compute_exponential_backoff(&config, 10), 32_000);
    }

    #[test]
    fn test_rate_limit_hint_respected() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        let err = LlmError::RateLimited {
            retry_after_secs: 5,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 5000);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_config(3), |_| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(LlmError::Timeout { timeout_secs: 1 })
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();
        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<Attempted<()>, SearchError> = with_retry(&fast_config(3), |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SearchError::Connection {
                message: "reset".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<Attempted<()>, LlmError> = with_retry(&fast_config(5), |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::AuthFailed {
                provider: "openai".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_config(0), |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, LlmError>(1)
        })
        .await
        .unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
