//! Bounded-deadline retry for query submission.
//!
//! Only errors classified as transient are retried. Attempts stop once the
//! next backoff would overrun the deadline; the last error is then returned
//! as a deadline failure carrying the original message and, as its source,
//! the original error.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result, WarehouseError, WarehouseErrorKind};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total time budget across all attempts.
    pub deadline: Duration,
    pub initial_delay: Duration,
    /// Caps exponential growth.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            ..Self::default()
        }
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's deadline would be exceeded.
pub async fn retry_with_deadline<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                let delay = policy.backoff_delay(attempt);
                let elapsed = started.elapsed();
                if elapsed + delay > policy.deadline {
                    warn!(
                        attempts = attempt + 1,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Retry deadline exceeded"
                    );
                    return Err(deadline_exceeded(err, attempt + 1));
                }

                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                metrics::record_query_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn deadline_exceeded(last: Error, attempts: u32) -> Error {
    let message = match &last {
        Error::Warehouse(e) => e.message.clone(),
        other => other.to_string(),
    };
    WarehouseError::new(
        WarehouseErrorKind::DeadlineExceeded,
        format!("gave up after {} attempts: {}", attempts, message),
    )
    .with_source(last)
    .into()
}
