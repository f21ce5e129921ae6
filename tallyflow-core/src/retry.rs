//! Bounded retries with a fixed pause between attempts.
//!
//! Two entry points: [`execute`] takes the retry count and pause per call,
//! [`with_retry`] takes a [`RetryPolicy`] plus an explicit [`Retryability`]
//! so call sites decide whether an operation is safe to repeat. Only
//! transient failures ([`crate::error::TallyError::is_transient`]) are retried.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::Result;

pub const DEFAULT_RETRIES: u32 = 10;
pub const DEFAULT_SLEEP_MS: u64 = 5_000;

/// Retry count and pause shared by the storage call sites of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    pub sleep_ms: u64,
}

impl RetryPolicy {
    pub const fn new(retries: u32, sleep: Duration) -> Self {
        Self {
            retries,
            sleep_ms: sleep.as_millis() as u64,
        }
    }

    /// Single attempt, no pause.
    pub const fn none() -> Self {
        Self {
            retries: 0,
            sleep_ms: 0,
        }
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            sleep_ms: DEFAULT_SLEEP_MS,
        }
    }
}

/// Whether an operation may be repeated after a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retryability {
    /// Idempotent writes and reads.
    Retryable,
    /// Operations that must not be replayed blindly.
    Once,
}

/// Runs `operation` up to `retries + 1` times.
///
/// Transient failures are followed by a pause of `sleep`; the last failure
/// is returned once the retries are used up. Any other failure is returned
/// immediately.
pub async fn execute<T, F, Fut>(
    label: &str,
    retries: u32,
    sleep: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut remaining = retries;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && remaining > 0 => {
                remaining -= 1;
                warn!(
                    operation = label,
                    remaining,
                    error = %err,
                    "operation failed, retrying in {:?}",
                    sleep
                );
                tokio::time::sleep(sleep).await;
            }
            Err(err) => {
                if err.is_transient() {
                    error!(
                        operation = label,
                        attempts = retries + 1,
                        error = %err,
                        "operation failed, retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}

/// Applies `policy` when `retryability` allows it, otherwise runs once.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    retryability: Retryability,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match retryability {
        Retryability::Retryable => {
            execute(label, policy.retries, policy.sleep(), operation).await
        }
        Retryability::Once => operation().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::error::TallyError;

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_runs_retries_plus_one_times() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<()> =
            execute("always fails", 3, Duration::from_secs(5), || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TallyError::Storage("unavailable".into()))
            })
            .await;

        assert!(matches!(result, Err(TallyError::Storage(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeding_operation_runs_once() {
        let attempts = AtomicU32::new(0);

        let value = execute("succeeds", 10, Duration::from_secs(5), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_later_attempt_succeeds() {
        let attempts = AtomicU32::new(0);

        let value = execute("flaky", 5, Duration::from_millis(10), || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                Err(TallyError::Storage("timeout".into()))
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: Result<()> =
            execute("bad input", 5, Duration::from_secs(1), || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TallyError::InvalidEvent("missing task id".into()))
            })
            .await;

        assert!(matches!(result, Err(TallyError::InvalidEvent(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmarked_operations_fail_on_first_error() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_secs(1));

        let result: Result<()> =
            with_retry(policy, Retryability::Once, "increment", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TallyError::Storage("unavailable".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn marked_operations_follow_the_policy() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_secs(1));

        let result: Result<()> =
            with_retry(policy, Retryability::Retryable, "upsert", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TallyError::Storage("unavailable".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, DEFAULT_RETRIES);
        assert_eq!(policy.sleep(), Duration::from_millis(DEFAULT_SLEEP_MS));
        assert_eq!(RetryPolicy::none().retries, 0);
    }
}
