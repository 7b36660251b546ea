//! Bounded retry with exponential backoff for channel sends.

use crate::NotifyError;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use tw_config::DispatchConfig;

/// Fraction of the capped delay added as random jitter.
const JITTER_FRACTION: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }

    /// Delay before retry number `retry` (0-indexed):
    /// `min(initial * 2^retry, max)` plus up to 25% jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as u64;
        let capped_ms = base_ms
            .saturating_mul(2u64.saturating_pow(retry))
            .min(self.max_backoff.as_millis() as u64);

        let jitter_max_ms = (capped_ms as f64 * JITTER_FRACTION) as u64;
        let jitter_ms = if jitter_max_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_max_ms)
        } else {
            0
        };
        Duration::from_millis(capped_ms + jitter_ms)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error or the
    /// attempt budget is spent. `attempts` counts every try, so callers that
    /// cancel the future still see how far it got.
    pub async fn run<F, Fut>(
        &self,
        channel: &str,
        attempts: &AtomicU32,
        mut op: F,
    ) -> Result<(), NotifyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), NotifyError>>,
    {
        let mut retry = 0;
        loop {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match op().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(channel, attempt, "Delivery succeeded after retry");
                    }
                    return Ok(());
                }
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.backoff(retry);
                    warn!(
                        channel,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }
}
