use std::fmt;
use std::future::Future;
use std::time::Duration;

use logstore_api::{BrokerError, StoreError};

/// Errors that may opt out of retrying.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryable for BrokerError {}

impl Retryable for StoreError {
    /// Retrying a duplicate can only produce the same duplicate.
    fn is_retryable(&self) -> bool {
        !self.is_duplicate()
    }
}

/// Bounded retry with a fixed delay between attempts.
///
/// A policy with `max_retries = n` makes at most `n + 1` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

/// Last error seen, with the number of attempts made.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Single attempt, no delay.
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `attempt` until it succeeds, returns a non-retryable error, or the
    /// budget is spent. Sleeps `delay` between attempts; dropping the returned
    /// future cancels the sleep.
    pub async fn run<T, E, F, Fut>(&self, op: &str, mut attempt: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(op, attempts, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() || attempts > self.max_retries => {
                    return Err(RetryError { attempts, last: e });
                }
                Err(e) => {
                    tracing::warn!(
                        op,
                        attempt = attempts,
                        max_attempts = self.max_attempts(),
                        delay = ?self.delay,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
