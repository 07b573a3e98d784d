//! Retry and deadline wrappers for remote store calls
//!
//! [`with_retry`] re-runs an operation after transient failures
//! ([`StoreError::is_transient`]) with exponential backoff. Anything else,
//! including cancellation, is returned immediately.
//!
//! [`with_timeout`] races an operation against a deadline so an
//! unresponsive store can never hang the caller. The engine wraps the whole
//! retried call, so the deadline also bounds the backoff sleeps.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use dataroom_core::config::RetryConfig;
use dataroom_core::domain::StoreError;
use dataroom_core::ports::StoreResult;

/// Retry count and backoff base for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Retry N waits `base_delay * 2^(N-1)`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff before the given retry (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Executes an async store operation, retrying transient failures.
///
/// Makes at most `policy.max_retries + 1` attempts. Once retries are
/// exhausted the last transient error is returned.
pub async fn with_retry<F, Fut, T>(operation: &str, policy: &RetryPolicy, mut f: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut retry = 0;
    loop {
        match f().await {
            Ok(value) => {
                if retry > 0 {
                    info!(operation, retry, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.delay_for(retry);
                warn!(
                    operation,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Races `fut` against `limit`, failing with [`StoreError::Timeout`] if the
/// deadline passes first. The losing future is dropped.
pub async fn with_timeout<Fut, T>(operation: &str, limit: Duration, fut: Fut) -> StoreResult<T>
where
    Fut: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, limit_ms = limit.as_millis() as u64, "Operation timed out");
            Err(StoreError::Timeout(format!(
                "{operation} did not complete within {}ms",
                limit.as_millis()
            )))
        }
    }
}
