//! Retry with exponential backoff for guarded calls.
//!
//! [`RetryOrchestrator::execute`] is the single entry point every outbound
//! call goes through: it waits for a quota slot, invokes the call, and
//! retries transient failures.
//!
//! # Example
//!
//! ```rust,no_run
//! use quota_gate::rate_limit::QuotaLimiter;
//! use quota_gate::retry::{RetryOrchestrator, RetryPolicy};
//! use quota_gate::{GateError, UpstreamError};
//!
//! # async fn run() -> Result<(), GateError> {
//! let limiter = QuotaLimiter::default();
//! let retry = RetryOrchestrator::new(RetryPolicy::default());
//!
//! // "503" is transient, so this is attempted four times before failing.
//! let result = retry
//!     .execute(
//!         || async { Err::<String, _>(GateError::Upstream(UpstreamError::from_message("503"))) },
//!         Some(&limiter),
//!     )
//!     .await;
//! assert!(result.is_err());
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{FailureKind, GateError, QuotaExceeded, UpstreamError};
use crate::rate_limit::QuotaLimiter;

/// Errors that can be classified for retry.
pub trait Retryable {
    /// Classify this failure.
    fn failure_kind(&self) -> FailureKind;
}

impl Retryable for FailureKind {
    fn failure_kind(&self) -> FailureKind {
        *self
    }
}

impl Retryable for UpstreamError {
    fn failure_kind(&self) -> FailureKind {
        self.kind
    }
}

impl Retryable for reqwest::Error {
    fn failure_kind(&self) -> FailureKind {
        if self.is_timeout() {
            FailureKind::Timeout
        } else if let Some(status) = self.status() {
            FailureKind::from_status(status)
        } else {
            FailureKind::Unknown
        }
    }
}

impl Retryable for GateError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            GateError::Upstream(error) => error.failure_kind(),
            GateError::Http(error) => error.failure_kind(),
            GateError::HttpMiddleware(reqwest_middleware::Error::Reqwest(error)) => {
                error.failure_kind()
            }
            // The wait ceiling is already spent.
            GateError::QuotaExceeded(_) => FailureKind::Unknown,
            _ => FailureKind::Unknown,
        }
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub exponential_base: f64,
}

impl RetryPolicy {
    /// Delay to sleep after failed attempt number `attempt` (zero based).
    ///
    /// `min(base_delay * exponential_base^attempt, max_delay)`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Whether a failed attempt should be retried.
    pub fn should_retry<E: Retryable>(&self, error: &E, attempt: u32) -> bool {
        attempt < self.max_retries && error.failure_kind().is_transient()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
        }
    }
}

/// Runs calls under a quota limiter with retry on transient failures.
#[derive(Debug, Clone, Default)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    /// Create an orchestrator with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Get the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run an async call.
    ///
    /// Before every attempt the limiter, if any, is awaited. Non-retryable
    /// errors are returned on first occurrence; once retries are exhausted
    /// the last error is returned unchanged.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut call: F,
        limiter: Option<&QuotaLimiter>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display + From<QuotaExceeded>,
    {
        let mut attempt = 0;
        loop {
            if let Some(limiter) = limiter {
                limiter.await_slot().await?;
            }

            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let Some(delay) = self.next_delay(&error, attempt) else {
                return Err(error);
            };
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Run a blocking call. Same semantics as [`execute`](Self::execute).
    ///
    /// # Panics
    ///
    /// Panics if a limiter is supplied and this is called from within an
    /// async runtime.
    pub fn execute_blocking<T, E, F>(
        &self,
        mut call: F,
        limiter: Option<&QuotaLimiter>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Retryable + Display + From<QuotaExceeded>,
    {
        let mut attempt = 0;
        loop {
            if let Some(limiter) = limiter {
                limiter.await_slot_blocking()?;
            }

            let error = match call() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let Some(delay) = self.next_delay(&error, attempt) else {
                return Err(error);
            };
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    fn next_delay<E: Retryable + Display>(&self, error: &E, attempt: u32) -> Option<Duration> {
        if !self.policy.should_retry(error, attempt) {
            if attempt >= self.policy.max_retries && error.failure_kind().is_transient() {
                warn!(attempts = attempt + 1, %error, "Retries exhausted");
            } else {
                debug!(kind = ?error.failure_kind(), %error, "Not retrying");
            }
            return None;
        }

        let delay = self.policy.calculate_delay(attempt);
        warn!(attempt = attempt + 1, ?delay, %error, "Transient failure, retrying");
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn upstream(message: &str) -> GateError {
        GateError::Upstream(UpstreamError::from_message(message))
    }

    #[test]
    fn test_calculate_delay() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..7).map(|k| policy.calculate_delay(k).as_secs()).collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.calculate_delay(0), policy.base_delay);
        assert_eq!(policy.calculate_delay(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(&upstream("HTTP 429"), 0));
        assert!(policy.should_retry(&upstream("HTTP 429"), 2));
        assert!(!policy.should_retry(&upstream("HTTP 429"), 3));
        assert!(!policy.should_retry(&upstream("read timed out"), 10));

        for attempt in 0..5 {
            assert!(!policy.should_retry(&upstream("invalid symbol"), attempt));
        }
        assert!(!policy.should_retry(&upstream("something odd"), 0));
        assert!(!policy.should_retry(&GateError::Config("bad".into()), 0));

        let exhausted = GateError::QuotaExceeded(QuotaExceeded {
            window: crate::rate_limit::QuotaWindow::Daily,
            retry_after: Duration::from_secs(60),
        });
        assert_eq!(exhausted.failure_kind(), FailureKind::Unknown);
        assert!(!policy.should_retry(&exhausted, 0));
    }

    #[test]
    fn test_blocking_retries_then_succeeds() {
        let orchestrator = RetryOrchestrator::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        });
        let calls = Cell::new(0);

        let result = orchestrator.execute_blocking(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(upstream("gateway timeout"))
                } else {
                    Ok("quote")
                }
            },
            None,
        );

        assert_eq!(result.unwrap(), "quote");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_blocking_uses_limiter() {
        let orchestrator = RetryOrchestrator::default();
        let limiter = QuotaLimiter::default();

        let result: Result<u32, GateError> = orchestrator.execute_blocking(|| Ok(7), Some(&limiter));

        assert_eq!(result.unwrap(), 7);
        assert_eq!(limiter.stats().total_requests, 1);
    }
}
