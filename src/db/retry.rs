//! Bounded exponential backoff for transient store errors.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::{Result, TempboxError};

/// Retry policy for store operations that hit SQLITE_BUSY / SQLITE_LOCKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, or the
/// attempt ceiling is reached.
///
/// Only [`TempboxError::TransientStore`] is retried. When the ceiling is
/// reached the last transient error is returned with the attempt count.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    "{} hit a busy store (attempt {}/{}), retrying in {:?}: {}",
                    op, attempt, policy.max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(TempboxError::TransientStore(msg)) => {
                warn!("{} gave up after {} attempt(s): {}", op, attempt, msg);
                return Err(TempboxError::TransientStore(format!(
                    "{op} failed after {attempt} attempt(s): {msg}"
                )));
            }
            Err(e) => return Err(e),
        }
    }
}
