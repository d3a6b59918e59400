//! Retry of remote-tier calls.

use crate::config::RetryConfig;
use crate::error::{PersistError, PersistResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs one fallible asynchronous action with bounded retries.
///
/// A policy is single-use: [`run`](Self::run) may be called once, a second
/// call fails with [`PersistError::InconsistentState`]. Only retryable
/// failures are retried. Cancellation is checked before every attempt and
/// interrupts both in-flight attempts and backoff sleeps.
///
/// Retries run at background priority: after every backoff sleep the policy
/// yields to the scheduler before making the next attempt.
#[derive(Debug)]
pub struct RetryPolicy {
    name: String,
    config: RetryConfig,
    used: AtomicBool,
    attempts: AtomicU32,
}

impl RetryPolicy {
    /// Creates a policy; `name` identifies the action in logs.
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
            used: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    /// Creates a policy retrying after a constant `delay`.
    pub fn fixed(name: impl Into<String>, max_attempts: u32, delay: Duration) -> Self {
        Self::new(name, RetryConfig::fixed(max_attempts, delay))
    }

    /// Returns the number of attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Runs `action` until it succeeds, fails permanently, runs out of
    /// attempts, or `cancel` fires.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut action: F) -> PersistResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PersistResult<T>>,
    {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(PersistError::inconsistent(format!(
                "retry policy for {} reused",
                self.name
            )));
        }

        let max_attempts = self.config.max_attempts.max(1);
        loop {
            if cancel.is_cancelled() {
                return Err(PersistError::Cancelled);
            }
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(PersistError::Cancelled),
                result = action() => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(action = %self.name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(action = %self.name, attempts = attempt, error = %error, "giving up");
                return Err(error);
            }

            let delay = self.config.delay_for_attempt(attempt);
            warn!(
                action = %self.name,
                attempt,
                max_attempts,
                ?delay,
                error = %error,
                "attempt failed, retrying"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PersistError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            tokio::task::yield_now().await;
        }
    }
}
