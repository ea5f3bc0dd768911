//! Timeout wrapper for async operations.

use std::time::Duration;
use strata_core::StrataError;
use thiserror::Error;

/// Raised when an operation exceeds its deadline.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Operation timed out after {0:?}")]
pub struct TimedOut(pub Duration);

impl From<TimedOut> for StrataError {
    fn from(err: TimedOut) -> Self {
        StrataError::Timeout(err.to_string())
    }
}

/// Wraps an async operation with a timeout.
///
/// The caller's error type absorbs the elapsed deadline through `From<TimedOut>`.
pub async fn with_timeout<Fut, T, E>(duration: Duration, fut: Fut) -> Result<T, E>
where
    Fut: std::future::Future<Output = Result<T, E>>,
    E: From<TimedOut>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| E::from(TimedOut(duration)))?
}
