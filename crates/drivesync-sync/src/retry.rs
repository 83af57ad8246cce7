//! Retry with exponential backoff
//!
//! Only transient errors are retried. Each attempt carries its own timeout,
//! independent of cycle cancellation, and cancellation is honoured between
//! attempts and while backing off.
//!
//! Backoff schedule with the defaults: 1s, 2s, 4s, 8s (capped at 60s), or
//! whatever the remote asks for via `retry_after`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drivesync_core::config::TransferConfig;
use drivesync_core::ports::RemoteError;

use crate::TransferError;

/// Errors the retry loop knows how to classify
pub trait Retryable: Display {
    fn is_transient(&self) -> bool;

    /// Server-requested wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// The error reported when an attempt exceeds its timeout
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for RemoteError {
    fn is_transient(&self) -> bool {
        RemoteError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        RemoteError::retry_after(self)
    }

    fn timed_out(after: Duration) -> Self {
        RemoteError::Timeout(after)
    }
}

impl Retryable for TransferError {
    fn is_transient(&self) -> bool {
        TransferError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            Self::Permanent(_) => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        TransferError::from(RemoteError::Timeout(after))
    }
}

/// Why [`RetryPolicy::run`] gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The last attempt failed with a permanent error, or attempts ran out
    Failed(E),
    /// Cancellation was observed at a retry boundary
    Cancelled,
}

/// Backoff parameters shared by scanning and transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            operation_timeout: config.operation_timeout(),
        }
    }

    /// Delay before retry number `attempt + 1`
    ///
    /// `base * 2^attempt`, capped at `max_delay`; a server-provided
    /// `retry_after` takes precedence but is capped the same way.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = match retry_after {
            Some(wait) => wait,
            None => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(31))),
        };
        delay.min(self.max_delay)
    }

    /// Runs `f` until it succeeds, fails permanently, or attempts run out
    pub async fn run<F, Fut, T, E>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 && cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = match tokio::time::timeout(self.operation_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(self.operation_timeout)),
            };

            match result {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt, err.retry_after());
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(operation, attempts = attempt + 1, error = %err, "Retries exhausted");
                    }
                    return Err(RetryError::Failed(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            operation_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delay_schedule_is_capped() {
        let p = policy();
        assert_eq!(p.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(p.delay_for(1, None), Duration::from_millis(200));
        assert_eq!(p.delay_for(2, None), Duration::from_millis(350));
        assert_eq!(p.delay_for(40, None), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_after_takes_precedence() {
        let p = policy();
        assert_eq!(
            p.delay_for(0, Some(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
        assert_eq!(
            p.delay_for(0, Some(Duration::from_secs(10))),
            Duration::from_millis(350)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = policy()
            .run("flaky", &CancellationToken::new(), move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RemoteError::Network("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = policy()
            .run("quota", &CancellationToken::new(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::QuotaExceeded) }
            })
            .await;

        assert_eq!(result, Err(RetryError::Failed(RemoteError::QuotaExceeded)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = policy()
            .run("down", &CancellationToken::new(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Server("503".into())) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Failed(RemoteError::Server(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = policy()
            .run("slow", &CancellationToken::new(), move || {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok::<_, RemoteError>("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_at_retry_boundary() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let result: Result<(), _> = policy()
            .run("cancelled", &cancel, move || {
                trigger.cancel();
                async { Err(RemoteError::Network("down".into())) }
            })
            .await;

        assert_eq!(result, Err(RetryError::Cancelled));
    }
}
