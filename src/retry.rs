//! Bounded retry loops.
//!
//! Two shapes: retry until a time budget runs out, or retry a fixed number
//! of times. Both sleep between attempts on the tokio clock, so tests can
//! drive them with a paused runtime.

use crate::error::DeployError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Retry while attempts fail, until `timeout` has elapsed.
///
/// No attempt is started once the next delay would cross the deadline, so
/// the loop never ends with a useless sleep.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutRetry {
    pub timeout: Duration,
    pub delay: Duration,
}

impl TimeoutRetry {
    pub fn new(timeout: Duration, delay: Duration) -> Self {
        Self { timeout, delay }
    }

    /// Run `attempt` until it succeeds, `is_retryable` rejects its error, or
    /// the budget is spent. The last error is returned as is.
    pub async fn run<T, F, Fut, R>(
        &self,
        label: &str,
        mut attempt: F,
        mut is_retryable: R,
    ) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
        R: FnMut(&DeployError) -> bool,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !is_retryable(&err) {
                tracing::debug!(label, attempts, error = %err, "giving up: not retryable");
                return Err(err);
            }
            if Instant::now() + self.delay >= deadline {
                tracing::debug!(label, attempts, error = %err, "giving up: timed out");
                return Err(err);
            }

            tracing::debug!(label, attempts, error = %err, "retrying");
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Retry a fixed number of times.
#[derive(Debug, Clone, Copy)]
pub struct AttemptRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl AttemptRetry {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `attempt` up to `max_attempts` times (at least once).
    pub async fn run<T, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempts >= max {
                tracing::debug!(label, attempts, error = %err, "giving up: out of attempts");
                return Err(err);
            }

            tracing::debug!(label, attempts, error = %err, "retrying");
            tokio::time::sleep(self.delay).await;
        }
    }
}
