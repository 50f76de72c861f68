//! Retry and backoff logic for blobstore storage collaborators
//!
//! Storage adapters wrap each remote call in [`with_policy`] so that
//! transient failures (timeouts, throttling, 5xx responses) are retried
//! while permanent failures surface on the first attempt. The orchestration
//! layer never retries; it only ever sees the final error.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Boxed error carried through retry attempts
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: usize,
        source: BoxError,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: BoxError,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: BoxError,
    },
}

impl RetryError {
    /// Unwrap the error produced by the last attempt
    pub fn into_source(self) -> BoxError {
        match self {
            RetryError::MaxRetriesExceeded { source, .. }
            | RetryError::Transient { source, .. }
            | RetryError::Permanent { source, .. } => source,
        }
    }

    fn is_retryable(&self) -> bool {
        !matches!(self, RetryError::Permanent { .. })
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Boxed future for retry operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RetryResult<T>> + Send + 'a>>;

/// Default number of attempts, including the first one
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// How many times to try an operation and how long to wait in between
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    /// [`DEFAULT_MAX_ATTEMPTS`] attempts with [`cloud_storage_backoff_policy`]
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, cloud_storage_backoff_policy())
    }
}

/// Execute an operation, retrying transient failures according to `policy`
///
/// The closure receives the 1-based attempt number. A `Permanent` error is
/// returned as-is on the attempt that produced it; a transient error that
/// outlives the policy is returned as `MaxRetriesExceeded` wrapping the
/// last attempt's source error.
pub async fn with_policy<'a, F, T>(
    op_name: &'static str,
    policy: RetryPolicy,
    mut f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'a, T>,
{
    let RetryPolicy {
        max_attempts,
        mut backoff,
    } = policy;
    backoff.reset();

    let mut attempt = 1;

    loop {
        debug!(operation = op_name, attempt, "Attempting operation");

        let err = match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = op_name,
                        attempts = attempt,
                        "Operation succeeded after retrying"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(
                operation = op_name,
                attempt,
                error = %err,
                "Operation failed permanently"
            );
            return Err(err);
        }

        let delay = if attempt < max_attempts {
            backoff.next_backoff()
        } else {
            None
        };

        match delay {
            Some(delay) => {
                warn!(
                    operation = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            None => {
                return Err(RetryError::MaxRetriesExceeded {
                    operation: op_name,
                    attempts: attempt,
                    source: err.into_source(),
                });
            }
        }
    }
}

#[cfg(feature = "async-rt")]
async fn sleep(delay: Duration) {
    tokio::time::sleep(delay).await;
}

#[cfg(not(feature = "async-rt"))]
async fn sleep(delay: Duration) {
    std::thread::sleep(delay);
}

/// Backoff policy for object-storage control API calls
pub fn cloud_storage_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(60)))
        .with_multiplier(1.5)
        .build()
}

/// Helper macro for creating transient errors
#[macro_export]
macro_rules! transient_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Transient {
            operation: $op,
            source: Box::new($err),
        }
    };
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: $op,
            source: Box::new($err),
        }
    };
}
