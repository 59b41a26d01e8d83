//! Bounded retry with exponential backoff and a hard per-attempt deadline.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::MarketDataError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * factor^retry`,
    /// capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let seconds = self.base_delay.as_secs_f64() * self.factor.powi(retry as i32);
        Duration::from_secs_f64(seconds.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Every attempt is bounded by
/// `policy.attempt_timeout`; cancelling `cancel` aborts the in-flight attempt
/// and any pending backoff sleep.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, MarketDataError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MarketDataError>>,
{
    let mut retry = 0;
    loop {
        let attempt = tokio::time::timeout(policy.attempt_timeout, op());
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MarketDataError::Cancelled),
            outcome = attempt => outcome.unwrap_or_else(|_| {
                Err(MarketDataError::Timeout {
                    provider: provider.to_string(),
                })
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                let delay = policy.delay_for_retry(retry);
                retry += 1;
                tracing::debug!(
                    "{} attempt failed ({}), retry {}/{} in {:?}",
                    provider,
                    e,
                    retry,
                    policy.max_retries,
                    delay
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(MarketDataError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}
