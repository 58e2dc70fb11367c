//! Bounded retry with exponential backoff for transient store failures.

use std::thread::sleep;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::StoreError;

/// Configuration for retry behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt + 1`.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;
        Duration::from_millis(backoff_ms)
    }
}

/// Run `f`, retrying while it fails with a transient `StoreError`.
///
/// Non-transient errors are returned immediately. After `max_retries` the
/// last transient error is returned.
pub fn retry_transient<T, F>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut attempt = 0;

    loop {
        match f() {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt = attempt + 1, "store call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if attempt >= config.max_retries {
                    warn!(operation, attempt = attempt + 1, error = %err, "store call failed after max retries");
                    return Err(err);
                }

                let backoff = config.backoff_duration(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "store call failed, retrying after backoff"
                );
                sleep(backoff);
                attempt += 1;
            }
        }
    }
}
