//! Retry policies for source fetches.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::source::SourceError;

/// How a tile fetch handles transient source failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries, fail immediately on error.
    None,

    /// Fixed number of attempts with constant delay between them.
    ///
    /// Elevation services throttle rather than degrade, so a constant
    /// pause matches their behavior better than aggressive backoff.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },
}

impl RetryPolicy {
    /// Creates a fixed retry policy.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum number of attempts (including initial)
    /// * `delay` - Fixed delay between attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// Maximum number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => (*max_attempts).max(1),
        }
    }

    /// Delay before the next attempt, or `None` when `attempt` was the
    /// last one allowed. `attempt` is 1-based.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_attempts, delay } => {
                if attempt < *max_attempts {
                    Some(*delay)
                } else {
                    None
                }
            }
        }
    }
}

/// Drives `op` under a retry policy.
///
/// Non-retryable errors (see [`SourceError::retryable`]) are returned
/// immediately; retryable ones are retried with the policy's delay until
/// the attempt budget runs out, at which point the last error is returned.
pub async fn retry_fetch<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.retryable() => return Err(err),
            Err(err) => match policy.delay_for_attempt(attempt) {
                Some(delay) => {
                    warn!(
                        source = label,
                        attempt,
                        error = %err,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            },
        }
    }
}
