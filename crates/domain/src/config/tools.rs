use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool control plane (§4.4)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

/// Per-invocation timeout, with optional per-tool overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "d_default_ms")]
    pub default_ms: u64,
    #[serde(default)]
    pub overrides: HashMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { default_ms: d_default_ms(), overrides: HashMap::new() }
    }
}

/// Retry policy applied before a tool invocation is surfaced as failed
/// (§4.4: `min(base*multiplier^n, max_delay)` delay × uniform jitter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "d_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// When true, the computed delay is scaled by a uniform random factor
    /// in [0.5, 1.0) to avoid thundering-herd retries.
    #[serde(default = "d_true")]
    pub jitter: bool,
    /// Case-insensitive substrings matched against an error message to
    /// decide whether it is retryable.
    #[serde(default = "d_retryable_patterns")]
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: d_max_retries(),
            base_delay_ms: d_base_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            backoff_multiplier: d_backoff_multiplier(),
            jitter: true,
            retryable_patterns: d_retryable_patterns(),
        }
    }
}

/// Per-tool concurrency limits enforced by a FIFO-queued semaphore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "d_default_limit")]
    pub default_limit: u32,
    #[serde(default)]
    pub overrides: HashMap<String, u32>,
    /// Max time a call may wait for a free concurrency slot before the
    /// invocation fails with a `timed_out` state (§4.4 state machine).
    #[serde(default = "d_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { default_limit: d_default_limit(), overrides: HashMap::new(), max_wait_ms: d_max_wait_ms() }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_ms() -> u64 {
    30_000
}
fn d_max_retries() -> u32 {
    2
}
fn d_base_delay_ms() -> u64 {
    200
}
fn d_max_delay_ms() -> u64 {
    5_000
}
fn d_backoff_multiplier() -> f64 {
    2.0
}
fn d_true() -> bool {
    true
}
fn d_retryable_patterns() -> Vec<String> {
    vec!["timeout".into(), "connection reset".into(), "rate limit".into(), "temporarily unavailable".into()]
}
fn d_default_limit() -> u32 {
    4
}
fn d_max_wait_ms() -> u64 {
    60_000
}
