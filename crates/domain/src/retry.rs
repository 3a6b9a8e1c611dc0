use std::time::Duration;

use tracing::warn;

use crate::clock::Pacer;
use crate::ports::BoxFuture;
use crate::ports::platform::PlatformError;

/// Reusable retry policy for platform calls: transient failures back off
/// geometrically, an expired session triggers the refresh hook before the
/// next attempt, and anything else returns immediately.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(pow).min(max_ms)
}

impl RetryPolicy {
    pub async fn run<T>(
        &self,
        pacer: &dyn Pacer,
        mut op: impl FnMut() -> BoxFuture<'static, Result<T, PlatformError>>,
        mut refresh: impl FnMut() -> BoxFuture<'static, Result<(), PlatformError>>,
    ) -> Result<T, PlatformError> {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(attempt, error = %err, "transient platform failure, backing off");
                    if err.needs_reauth() {
                        refresh().await?;
                    }
                    let delay = backoff_ms(self.base_backoff_ms, attempt, self.max_backoff_ms);
                    pacer.pause(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
