//! Bounded retry with a fixed period.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default number of attempts.
pub const DEFAULT_NUM_ATTEMPTS: u32 = 10;

/// Default period between attempts.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

/// How often and how long to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub num_attempts: u32,
    /// Sleep between two attempts.
    pub period: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { num_attempts: DEFAULT_NUM_ATTEMPTS, period: DEFAULT_PERIOD }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(num_attempts: u32, period: Duration) -> Self {
        Self { num_attempts, period }
    }
}

/// Error returned once an operation stops being retried.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Number of attempts made.
    pub attempts: u32,
    /// Error of the last attempt.
    pub source: E,
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
///
/// # Arguments
/// * `policy` - attempt budget and sleep period
/// * `operation` - called with the 1-based attempt number
/// * `is_retryable` - decides whether an error is worth another attempt
///
/// # Returns
/// The first successful value, or the last error together with the number of
/// attempts made.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, RetryExhausted<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.num_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                debug!(attempt, max_attempts, error = %err, "Attempt failed, retrying");
                tokio::time::sleep(policy.period).await;
                attempt += 1;
            }
            Err(source) => return Err(RetryExhausted { attempts: attempt, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result = retry(
            &policy,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { if attempt < 3 { Err("not yet") } else { Ok(attempt) } }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result: Result<(), _> = retry(
            &policy,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
            |_| false,
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let policy = RetryPolicy::new(2, Duration::from_millis(20));
        let start = std::time::Instant::now();
        let result: Result<(), _> = retry(&policy, |_| async { Err("missing") }, |_| true).await;
        assert_eq!(result.unwrap_err().attempts, 2);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.num_attempts, 10);
        assert_eq!(policy.period, Duration::from_secs(2));
    }
}
