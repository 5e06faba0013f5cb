//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use crate::error::ScriptoriumError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

/// Passed to the retry observer when a retry has been scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    /// 0-based index of this retry.
    pub retry_count: u32,
    /// 1-based number of the attempt about to run.
    pub next_attempt: u32,
    /// Backoff applied before the next attempt.
    pub delay: Duration,
    /// Display form of the error that triggered the retry.
    pub error: String,
}

impl RetryNotice {
    /// 1-based retry number.
    pub fn retry_number(&self) -> u32 {
        self.retry_count + 1
    }
}

impl RetryPolicy {
    /// Policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Execute an async operation with retry.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, ScriptoriumError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScriptoriumError>>,
    {
        self.execute_with_notify(operation, |_| {}).await
    }

    /// Execute an async operation with retry, reporting each scheduled retry.
    ///
    /// Only errors where [`ScriptoriumError::is_retryable`] holds are retried.
    pub async fn execute_with_notify<F, Fut, T, N>(
        &self,
        mut operation: F,
        mut on_retry: N,
    ) -> Result<T, ScriptoriumError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScriptoriumError>>,
        N: FnMut(&RetryNotice),
    {
        if self.max_attempts == 0 {
            return Err(ScriptoriumError::Configuration(
                "retry policy allows zero attempts".to_string(),
            ));
        }

        let mut backoff = self.initial_backoff;
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if !e.is_retryable() || attempt >= self.max_attempts {
                        return Err(e);
                    }

                    let delay = match &e {
                        ScriptoriumError::RateLimited {
                            retry_after_ms: Some(ms),
                        } => Duration::from_millis(*ms).min(self.max_backoff),
                        _ => {
                            // Jitter: 75%–125% of backoff
                            let jitter_factor = 0.75 + (rand_factor() * 0.5);
                            Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor)
                        }
                    };

                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Retrying after error"
                    );
                    on_retry(&RetryNotice {
                        retry_count: attempt - 1,
                        next_attempt: attempt + 1,
                        delay,
                        error: e.to_string(),
                    });

                    tokio::time::sleep(delay).await;

                    backoff = Duration::from_secs_f64(
                        (backoff.as_secs_f64() * self.multiplier)
                            .min(self.max_backoff.as_secs_f64()),
                    );
                }
            }
        }
    }
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
