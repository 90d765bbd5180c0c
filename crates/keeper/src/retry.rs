//! Bounded exponential backoff and absolute deadlines for chain calls

use std::future::Future;
use std::time::Duration;

use range_types::{ChainError, ChainResult};
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Run `op` until it succeeds, fails terminally, or `max_retries` retries are spent.
///
/// Only errors for which [`ChainError::is_retryable`] holds are retried.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> ChainResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChainResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let delay_ms = config.delay_for_attempt(attempt);
                warn!(
                    operation = label,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms,
                    error = %err,
                    "Retryable chain error, backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Bound a chain call by an absolute deadline
pub async fn with_timeout<T, Fut>(deadline: Duration, fut: Fut) -> ChainResult<T>
where
    Fut: Future<Output = ChainResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChainError::Timeout {
            timeout_ms: deadline.as_millis() as u64,
        }),
    }
}
