//! # Activity Runner
//!
//! Runs one external operation with a per-attempt timeout and a bounded
//! exponential retry. Non-retryable errors end the loop immediately.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ActivityError, ServiceError, ServiceResult};

/// Timeout and retry budget for one external operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    /// Upper bound for a single attempt.
    pub start_to_close_timeout: Duration,
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(120),
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(60),
        }
    }
}

impl ActivityOptions {
    /// Delay after the given failed attempt (1-based).
    pub fn retry_interval(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(64) as i32;
        let candidate =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        if !candidate.is_finite() || candidate >= self.maximum_interval.as_secs_f64() {
            self.maximum_interval
        } else {
            Duration::from_secs_f64(candidate)
        }
    }
}

/// Execute `operation` until it succeeds, fails with a non-retryable error or
/// runs out of attempts.
pub async fn run_activity<T, F, Fut>(
    name: &str,
    options: &ActivityOptions,
    mut operation: F,
) -> Result<T, ActivityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ServiceResult<T>>,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(options.start_to_close_timeout, operation()).await
        {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(format!(
                "{name} did not complete within {:?}",
                options.start_to_close_timeout
            ))),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(activity = %name, attempt = attempt, "Activity succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => {
                return Err(ActivityError::NonRetryable {
                    activity: name.to_string(),
                    source: error,
                });
            }
            Err(error) if attempt >= max_attempts => {
                return Err(ActivityError::RetriesExhausted {
                    activity: name.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }
            Err(error) => {
                let delay = options.retry_interval(attempt);
                warn!(
                    activity = %name,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Activity attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
