//! Bounded exponential backoff for optimistic-concurrency conflicts.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::BindError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `backoff * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// policy's attempts are used up.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, BindError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BindError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(BindError::RetriesExhausted {
                        what: what.to_string(),
                        attempts,
                        last: Box::new(e),
                    });
                }
                let delay = policy.delay(attempt - 1);
                debug!(%what, attempt, ?delay, "conflict, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
