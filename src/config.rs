use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

// ─── Loop control ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopControl {
    /// Hard limit on steps per run; exceeding it is fatal to the run.
    pub max_steps_per_run: usize,
    /// Attempt bound for the retry policy around each provider call.
    pub max_retries_per_step: u32,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self {
            max_steps_per_run: 100,
            max_retries_per_step: 5,
        }
    }
}

// ─── Retry / backoff ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay before the first retry.
    pub initial_ms: u64,
    /// Ceiling on the exponential delay.
    pub max_ms: u64,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_ms: 300,
            max_ms: 5_000,
            jitter_ms: 500,
        }
    }
}

// ─── Top-level config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub loop_control: LoopControl,
    pub retry: RetryConfig,
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parse animus config")
    }
}
