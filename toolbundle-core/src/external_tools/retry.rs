//! Bounded exponential backoff for transient network failures.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::error::ToolError;
use crate::config::Settings;

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// Only errors where [`ToolError::is_transient`] holds are retried. The
    /// backoff sleep is abandoned with `Cancelled` if `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ToolError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        what, err, attempt, self.max_retries, delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ToolError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(3000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(3000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(3)
            .run("fetch", &CancellationToken::new(), move |_| async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ToolError::Network("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(2)
            .run("fetch", &CancellationToken::new(), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ToolError::HttpStatus {
                    status: 503,
                    url: "https://host".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(ToolError::HttpStatus { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(5)
            .run("fetch", &CancellationToken::new(), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ToolError::HttpStatus {
                    status: 404,
                    url: "https://host".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), _> = policy(1).run("fetch", &token, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }
}
