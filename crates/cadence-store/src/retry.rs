//! Backoff for transient store failures.
//!
//! Network errors, rate limits and 5xx responses are retried. A rate limit
//! that names its own wait (`Retry-After`) is waited out exactly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info_span, warn, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_retry;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Ceiling for computed (not server-requested) delays
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// `STORE_MAX_RETRIES`, `STORE_RETRY_BASE_MS` and `STORE_RETRY_MAX_MS`,
    /// each falling back to its default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_number("STORE_MAX_RETRIES").unwrap_or(defaults.max_retries),
            base_delay_ms: env_number("STORE_RETRY_BASE_MS").unwrap_or(defaults.base_delay_ms),
            max_delay_ms: env_number("STORE_RETRY_MAX_MS").unwrap_or(defaults.max_delay_ms),
        }
    }

    /// A single attempt, no backoff.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt + 1`.
    fn backoff(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(requested) = retry_after_ms {
            return Duration::from_millis(requested);
        }

        let ceiling = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
            .min(self.max_delay_ms);

        Duration::from_millis(jitter(ceiling).max(self.base_delay_ms.min(ceiling)))
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Uniform-ish value in `[0, ceiling]` seeded from the clock's sub-second part.
fn jitter(ceiling: u64) -> u64 {
    if ceiling == 0 {
        return 0;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::from(elapsed.subsec_nanos()))
        .unwrap_or_default();
    seed % (ceiling + 1)
}

/// Run `op` until it succeeds, fails permanently or runs out of retries.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> StoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let span = info_span!("store_attempt", operation = %operation, attempt = attempt + 1);
        let error: StoreError = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= config.max_retries {
            return Err(error);
        }

        let wait = config.backoff(attempt, error.retry_after_ms());
        warn!(
            operation = %operation,
            attempt = attempt + 1,
            wait_ms = wait.as_millis() as u64,
            "Store call failed, backing off: {}",
            error
        );
        record_retry(operation);

        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
