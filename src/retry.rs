//! Exponential backoff for transport-level calls (CloudKit downloads, B2
//! requests). Whole sync tasks are never retried; a rerun does that.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Backoff parameters. Jitter up to `base_delay` is added to every wait so
/// concurrent workers hitting the same outage do not retry in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// No waiting and no retries; the first error is returned.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-indexed):
    /// `min(base * 2^retry, max) + jitter(0..base)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms > 0 {
            rand::thread_rng().gen_range(0..base_ms)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

/// Run `operation` until it succeeds, the classifier says `Abort`, or the
/// policy's retries are used up. `what` names the operation in warnings.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    what: &str,
    classifier: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let mut retry = 0u32;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort || retry >= policy.max_retries {
                    return Err(e);
                }
                let delay = policy.delay_for_retry(retry);
                retry += 1;
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    what,
                    retry,
                    policy.max_retries + 1,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
