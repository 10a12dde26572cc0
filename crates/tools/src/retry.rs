//! Retry manager (§4.4 "Retry manager").
//!
//! Retries a tool invocation with exponential backoff and optional jitter,
//! but only for errors whose message matches a configured retryable
//! pattern — everything else short-circuits immediately.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::descriptor::ToolError;

/// Patterns that mark an error as transient/retryable by default.
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "connection reset",
    "econnreset",
    "timeout",
    "etimedout",
    "dns",
    "enotfound",
    "rate limit",
    "too many requests",
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_patterns: DEFAULT_RETRYABLE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RetryPolicy {
    /// `true` if `message` (case-insensitive) contains any configured
    /// retryable pattern.
    pub fn is_retryable(&self, message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        self.retryable_patterns.iter().any(|p| lower.contains(&p.to_ascii_lowercase()))
    }

    /// Delay before attempt `n` (0-indexed): `min(base * multiplier^n, max)`,
    /// optionally scaled by a uniform jitter fraction in `[0.5, 1.0]`.
    pub fn delay_for_attempt(&self, n: u32) -> std::time::Duration {
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(n as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        let ms = if self.jitter {
            capped * jitter_fraction()
        } else {
            capped
        };
        std::time::Duration::from_millis(ms.round() as u64)
    }
}

/// Retry manager: holds per-tool policies and drives the retry loop.
pub struct RetryManager {
    default_policy: RetryPolicy,
    overrides: parking_lot::RwLock<std::collections::HashMap<String, RetryPolicy>>,
}

impl RetryManager {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self { default_policy, overrides: parking_lot::RwLock::new(std::collections::HashMap::new()) }
    }

    pub fn set_policy(&self, tool_name: &str, policy: RetryPolicy) {
        self.overrides.write().insert(tool_name.to_string(), policy);
    }

    pub fn policy_for(&self, tool_name: &str) -> RetryPolicy {
        self.overrides.read().get(tool_name).cloned().unwrap_or_else(|| self.default_policy.clone())
    }

    /// Run `attempt` up to `policy.max_retries + 1` times, retrying only
    /// retryable failures with backoff between attempts. Returns the final
    /// error (with `attempts` embedded via the caller) if all attempts fail.
    pub async fn run_with_retry<F, Fut>(
        &self,
        tool_name: &str,
        mut attempt: F,
    ) -> Result<(serde_json::Value, u32), ToolError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, ToolError>>,
    {
        let policy = self.policy_for(tool_name);
        let mut last_err = None;

        for n in 0..=policy.max_retries {
            match attempt().await {
                Ok(v) => return Ok((v, n + 1)),
                Err(e) => {
                    let retryable = policy.is_retryable(&e.to_string());
                    last_err = Some(e);
                    if !retryable || n == policy.max_retries {
                        break;
                    }
                    tokio::time::sleep(policy.delay_for_attempt(n)).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ToolError::Execution(tool_name.to_string(), "no attempts made".into())))
    }
}

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cheap uniform-ish fraction in `[0.5, 1.0)`, grounded on the teacher's
/// `pseudo_random_fraction` (Knuth multiplicative hash) — not
/// cryptographically random, just enough to spread concurrent retries apart.
fn jitter_fraction() -> f64 {
    let n = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let seed = (n as u32)
        .wrapping_mul(2654435761)
        .wrapping_add(std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0));
    let unit = (seed as f64) / (u32::MAX as f64);
    0.5 + unit * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_retryable_matches_default_patterns_case_insensitively() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable("Connection RESET by peer"));
        assert!(policy.is_retryable("ETIMEDOUT"));
        assert!(policy.is_retryable("Too Many Requests"));
        assert!(!policy.is_retryable("invalid argument"));
    }

    #[test]
    fn delay_for_attempt_grows_exponentially_and_caps() {
        let policy = RetryPolicy { jitter: false, ..RetryPolicy::default() };
        assert_eq!(policy.delay_for_attempt(0).as_millis(), 200);
        assert_eq!(policy.delay_for_attempt(1).as_millis(), 400);
        assert_eq!(policy.delay_for_attempt(2).as_millis(), 800);
        let capped = policy.delay_for_attempt(20);
        assert_eq!(capped.as_millis(), policy.max_delay_ms as u128);
    }

    #[test]
    fn delay_for_attempt_with_jitter_stays_in_half_to_full_range() {
        let policy = RetryPolicy::default();
        for n in 0..5 {
            let d = policy.delay_for_attempt(n).as_millis() as f64;
            let raw = (policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(n as i32))
                .min(policy.max_delay_ms as f64);
            assert!(d >= raw * 0.5 - 1.0 && d <= raw + 1.0);
        }
    }

    #[tokio::test]
    async fn run_with_retry_succeeds_after_retryable_failures() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
            retryable_patterns: vec!["etimedout".into()],
        };
        let mgr = RetryManager::new(policy);
        let calls = std::sync::atomic::AtomicU32::new(0);

        let (value, attempts) = mgr
            .run_with_retry("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ToolError::Execution("flaky".into(), "ETIMEDOUT".into()))
                    } else {
                        Ok(serde_json::json!("ok"))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, serde_json::json!("ok"));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn run_with_retry_short_circuits_non_retryable_errors() {
        let mgr = RetryManager::new(RetryPolicy::default());
        let calls = std::sync::atomic::AtomicU32::new(0);

        let result = mgr
            .run_with_retry("bad-args", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ToolError::Execution("bad-args".into(), "invalid argument".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_for_falls_back_to_default_when_no_override() {
        let mgr = RetryManager::new(RetryPolicy::default());
        assert_eq!(mgr.policy_for("anything").max_retries, 3);
    }

    #[test]
    fn set_policy_overrides_per_tool() {
        let mgr = RetryManager::new(RetryPolicy::default());
        mgr.set_policy("bash", RetryPolicy { max_retries: 5, ..RetryPolicy::default() });
        assert_eq!(mgr.policy_for("bash").max_retries, 5);
        assert_eq!(mgr.policy_for("other").max_retries, 3);
    }
}
