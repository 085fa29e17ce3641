//! Retry with exponential backoff inside a deadline

use crate::descriptor::RetryPolicy;
use crate::error::ToolError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of a retried call and the number of attempts made.
pub struct Attempted<T> {
    pub result: Result<T, ToolError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn should_retry(&self, err: &ToolError) -> bool {
        match err {
            ToolError::Transient { status: None, .. } => true,
            ToolError::Transient { status: Some(s), .. } | ToolError::Fatal { status: Some(s), .. } => {
                self.retryable_status.contains(s)
            }
            _ => false,
        }
    }

    /// Backoff before attempt `attempt + 1` (1-based `attempt`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Run `op` until it succeeds, fails non-retryably, exhausts attempts, or
/// `deadline` passes. Exhausted transient errors surface as fatal.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, deadline: Instant, mut op: F) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ToolError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout_at(deadline, op(attempt)).await {
            Ok(result) => result,
            Err(_) => {
                return Attempted {
                    result: Err(ToolError::Timeout(format!("deadline exceeded after {} attempt(s)", attempt))),
                    attempts: attempt,
                }
            }
        };

        let err = match result {
            Ok(value) => return Attempted { result: Ok(value), attempts: attempt },
            Err(err) => err,
        };

        let retryable = policy.should_retry(&err);
        let backoff = policy.backoff(attempt);
        if !retryable || attempt >= max_attempts || Instant::now() + backoff >= deadline {
            let err = match err {
                ToolError::Transient { status, message } if retryable => ToolError::Fatal { status, message },
                other => other,
            };
            return Attempted { result: Err(err), attempts: attempt };
        }

        debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "retrying");
        tokio::time::sleep(backoff).await;
    }
}
