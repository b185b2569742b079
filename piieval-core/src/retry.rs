//! Bounded exponential backoff for judge and redactor calls.

use std::future::Future;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::LlmError;

/// The outcome of a call that never succeeded.
#[derive(Debug)]
pub struct RetryFailure {
    /// Attempts actually made.
    pub attempts: u32,
    /// The error from the last attempt.
    pub error: LlmError,
}

/// Run `call` until it succeeds, fails with a non-transient error, or
/// `policy.max_retries` attempts have been made.
///
/// After failed attempt `n` (zero-based) the call waits
/// `retry_delay_secs * 2^n`; a rate-limit hint from the provider extends the
/// wait when it is longer. `call` receives the zero-based attempt number.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut call: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        let error = match call(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let attempts = attempt + 1;

        if !error.is_retryable() {
            warn!(operation, attempt = attempts, error = %error, "Non-transient error, giving up");
            return Err(RetryFailure { attempts, error });
        }
        if attempts >= max_attempts {
            warn!(operation, attempts, error = %error, "Retries exhausted");
            return Err(RetryFailure { attempts, error });
        }

        let mut wait = policy.delay_for_attempt(attempt);
        if let LlmError::RateLimited { retry_after_secs } = &error {
            wait = wait.max(std::time::Duration::from_secs(*retry_after_secs));
        }
        info!(
            operation,
            attempt = attempts,
            max_attempts,
            backoff_ms = wait.as_millis() as u64,
            error = %error,
            "Retrying after transient error"
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
