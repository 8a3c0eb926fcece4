//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry policy for an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Outcome of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    /// Number of attempts made (1 = no retries used).
    pub attempts: u32,
}

/// Run `op` until it succeeds or `config.max_retries` retries are used up.
///
/// On exhaustion returns the last error together with the attempt count.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> Result<Retried<T>, (E, u32)>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(err) if attempt >= max_attempts => return Err((err, attempt)),
            Err(err) => {
                let delay = config.delay_for(attempt);
                warn!(
                    operation = %operation,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_config_default() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base_ms, 500);
    }

    #[test]
    fn test_backoff_doubles() {
        let cfg = RetryConfig {
            max_retries: 5,
            backoff_base_ms: 100,
        };
        assert_eq!(cfg.delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_config_serde_partial() {
        let cfg: RetryConfig = serde_json::from_str(r#"{"max_retries": 1}"#).unwrap();
        assert_eq!(cfg.max_retries, 1);
        assert_eq!(cfg.backoff_base_ms, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig::default();
        let result = retry_with_backoff(&cfg, "upload", |_| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("503")
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();
        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let cfg = RetryConfig {
            max_retries: 2,
            backoff_base_ms: 10,
        };
        let err = retry_with_backoff(&cfg, "upload", |attempt| async move {
            Err::<(), _>(format!("failure {attempt}"))
        })
        .await
        .unwrap_err();
        assert_eq!(err, ("failure 3".to_string(), 3));
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig {
            max_retries: 0,
            backoff_base_ms: 0,
        };
        let err = retry_with_backoff(&cfg, "upload", |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("nope")
        })
        .await
        .unwrap_err();
        assert_eq!(err.1, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
