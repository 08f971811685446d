//! Bounded retry with exponential backoff.
//!
//! Every remote fetch goes through [`with_retry`]; this is the only
//! place network flakiness is absorbed. All errors are retried
//! uniformly; the node client does not distinguish retryable from
//! permanent failures.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Attempt budget and backoff schedule for one remote call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, at least 1.
    pub attempts: u32,
    /// Sleep before the second attempt; doubles after every failure.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

/// Run `op` until it succeeds or the attempt budget is exhausted.
///
/// Backoff doubles after every failed attempt (2s, 4s, ... by
/// default). No sleep follows the final failure.
///
/// # Errors
///
/// Returns the error of the last attempt once the budget is spent.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                tracing::warn!(attempt, backoff_secs = backoff.as_secs(), error = %err, "fetch failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}
