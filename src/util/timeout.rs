//! Timeout helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::ScriptoriumError;

/// Wrap a future with a timeout.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, ScriptoriumError>>,
) -> Result<T, ScriptoriumError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ScriptoriumError::Timeout(duration.as_millis() as u64)),
    }
}

/// Race a lookup against a timeout, treating timeouts and errors as `None`.
///
/// Used for dependencies the turn can proceed without.
pub async fn timeout_or_none<T>(
    label: &str,
    duration: Duration,
    future: impl Future<Output = Result<Option<T>, ScriptoriumError>>,
) -> Option<T> {
    match with_timeout(duration, future).await {
        Ok(value) => value,
        Err(ScriptoriumError::Timeout(ms)) => {
            tracing::warn!(dependency = label, timeout_ms = ms, "dependency timed out");
            None
        }
        Err(error) => {
            tracing::warn!(dependency = label, error = %error, "dependency failed");
            None
        }
    }
}
