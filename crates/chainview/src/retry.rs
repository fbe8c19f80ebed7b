//! Bounded exponential backoff around fallible async calls (RPC reads, event source reads).
//!
//! Only wrap idempotent operations; the wrapper does not deduplicate writes.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Backoff parameters. Delay before retry `n` (0-based) is `min(base_delay * 2^n, max_delay)`
/// plus up to `jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failure (0-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// All attempts failed.
#[derive(Debug, Error)]
#[error("{name}: gave up after {attempts} attempts: {last_error:#}")]
pub struct RetryExhausted {
    pub name: String,
    pub attempts: u32,
    #[source]
    pub last_error: anyhow::Error,
}

/// Run `op` until it succeeds or `policy.max_attempts` calls have failed.
///
/// Intermediate failures are logged at warn level. Sleeps only suspend the calling task.
pub async fn retry<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    tracing::error!(
                        op = name,
                        attempts = attempt,
                        reason = %e,
                        "retries exhausted"
                    );
                    return Err(RetryExhausted {
                        name: name.to_string(),
                        attempts: attempt,
                        last_error: e,
                    });
                }
                let mut delay = policy.delay_for(attempt - 1);
                if !policy.jitter.is_zero() {
                    let jitter_ms = policy.jitter.as_millis() as u64;
                    let extra = rand::thread_rng().gen_range(0..=jitter_ms);
                    delay += Duration::from_millis(extra);
                }
                tracing::warn!(
                    op = name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason = %e,
                    "call failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
