//! Bounded retries with Fibonacci backoff.

use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::error::{ExportError, ExportResult, RemoteError};
use std::sync::Arc;
use tracing::warn;

/// The outcome of a retried call and the retries it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryResult<T> {
    /// The successful result.
    pub value: T,
    /// Retries spent before the call succeeded.
    pub retries: u32,
}

impl<T> RetryResult<T> {
    /// Wraps a value.
    pub fn new(value: T, retries: u32) -> Self {
        Self { value, retries }
    }

    /// Maps the value, keeping the retry count.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RetryResult<U> {
        RetryResult {
            value: f(self.value),
            retries: self.retries,
        }
    }
}

/// Runs idempotent remote calls, retrying transient failures.
///
/// Fatal failures are returned immediately as [`ExportError::Remote`].
/// A transient failure on the last allowed attempt becomes
/// [`ExportError::ExhaustedRetries`].
#[derive(Clone)]
pub struct FibonacciRetryer {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FibonacciRetryer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FibonacciRetryer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FibonacciRetryer {
    /// Creates a retryer sleeping on `clock`.
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// The retry policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails fatally, or runs out of attempts.
    pub fn execute<T, F>(&self, mut operation: F) -> ExportResult<RetryResult<T>>
    where
        F: FnMut() -> Result<T, RemoteError>,
    {
        let mut retries = 0u32;
        loop {
            match operation() {
                Ok(value) => return Ok(RetryResult::new(value, retries)),
                Err(err) if !err.is_transient() => return Err(ExportError::Remote(err)),
                Err(err) => {
                    if retries + 1 >= self.config.max_attempts {
                        return Err(ExportError::ExhaustedRetries { retries, last: err });
                    }
                    retries += 1;
                    let delay = self.config.delay_for_retry(retries);
                    warn!(
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient remote failure, backing off"
                    );
                    self.clock.sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn retryer(attempts: u32) -> (FibonacciRetryer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = RetryConfig::new(attempts)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_secs(1));
        (FibonacciRetryer::new(config, clock.clone()), clock)
    }

    #[test]
    fn succeeds_without_retries() {
        let (retryer, clock) = retryer(5);
        let result = retryer.execute(|| Ok::<_, RemoteError>(42)).unwrap();
        assert_eq!(result, RetryResult::new(42, 0));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn counts_transient_failures_and_sleeps_fibonacci() {
        let (retryer, clock) = retryer(10);
        let mut failures_left = 4;
        let result = retryer
            .execute(|| {
                if failures_left > 0 {
                    failures_left -= 1;
                    Err(RemoteError::Throttled("slow down".into()))
                } else {
                    Ok("page")
                }
            })
            .unwrap();

        assert_eq!(result.retries, 4);
        assert_eq!(
            clock.sleeps(),
            [10, 10, 20, 30].map(Duration::from_millis).to_vec()
        );
        assert_eq!(clock.total_slept(), Duration::from_millis(70));
    }

    #[test]
    fn fatal_failure_is_not_retried() {
        let (retryer, clock) = retryer(10);
        let mut calls = 0;
        let err = retryer
            .execute(|| -> Result<(), RemoteError> {
                calls += 1;
                Err(RemoteError::AccessDenied("no".into()))
            })
            .unwrap_err();

        assert!(matches!(err, ExportError::Remote(RemoteError::AccessDenied(_))));
        assert_eq!(calls, 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn exhausting_attempts_reports_last_cause() {
        let (retryer, clock) = retryer(3);
        let mut calls = 0;
        let err = retryer
            .execute(|| -> Result<(), RemoteError> {
                calls += 1;
                Err(RemoteError::Timeout(format!("attempt {calls}")))
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(clock.sleeps().len(), 2);
        match err {
            ExportError::ExhaustedRetries { retries, last } => {
                assert_eq!(retries, 2);
                assert_eq!(last, RemoteError::Timeout("attempt 3".into()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn no_retry_policy_makes_one_attempt() {
        let clock = Arc::new(ManualClock::new());
        let retryer = FibonacciRetryer::new(RetryConfig::no_retry(), clock.clone());
        let err = retryer
            .execute(|| -> Result<(), RemoteError> { Err(RemoteError::Throttled("x".into())) })
            .unwrap_err();
        assert!(matches!(err, ExportError::ExhaustedRetries { retries: 0, .. }));
    }
}
