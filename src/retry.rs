//! Exponential-jitter retry around a single provider call.
//!
//! Reused verbatim for the per-step call and the compaction call; the only
//! difference is what is being retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial: Duration,
    max_wait: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial: Duration::from_millis(config.initial_ms),
            max_wait: Duration::from_millis(config.max_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Run `op` until it succeeds, exhausting at most `max_attempts` calls.
    /// Non-retryable errors and the final attempt's error propagate
    /// unchanged, with no wrapping.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(op = op_name, attempt, "recovered after retries");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    tracing::info!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient provider error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `min(max_wait, initial * 2^(attempt-1))` plus uniform jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = (attempt - 1).min(20);
        let backoff_ms = self
            .initial
            .as_millis()
            .saturating_mul(1u128 << exponent)
            .min(self.max_wait.as_millis()) as u64;
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::rng().random_range(0..self.jitter.as_millis() as u64)
        };
        Duration::from_millis(backoff_ms + jitter_ms)
    }
}
