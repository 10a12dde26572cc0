//! Error recovery (§4.4 "Error recovery").
//!
//! A per-tool strategy selector consulted once the retry/timeout/
//! concurrency pipeline has exhausted its own budget for an attempt:
//! `retry` loops the whole pipeline again, `fallback` re-routes to a
//! different tool with the same arguments, `skip` substitutes a
//! caller-provided default, and `error` surfaces the failure as-is.
//!
//! Also keeps a small in-memory failure history per tool so callers can
//! build circuit-breaking policies on top of `recent_failure_count`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;

/// What to do once a tool invocation has exhausted its retry/timeout
/// budget and still failed.
pub enum RecoveryStrategy {
    /// Re-run the full pipeline up to `max_retries` more times.
    Retry { max_retries: u32 },
    /// Re-route to a different tool, passing the same arguments.
    Fallback { tool_name: String },
    /// Return `default_value` instead of surfacing the error.
    Skip { default_value: Value },
    /// Surface the failure to the caller.
    Error,
}

/// How many failures happened, and when — kept per tool, oldest first.
struct FailureHistory {
    records: VecDeque<Instant>,
}

impl FailureHistory {
    fn new() -> Self {
        Self { records: VecDeque::new() }
    }
}

const MAX_HISTORY_PER_TOOL: usize = 256;

pub struct ErrorRecovery {
    default_strategy: RecoveryStrategy,
    strategies: RwLock<HashMap<String, RecoveryStrategy>>,
    history: RwLock<HashMap<String, FailureHistory>>,
}

impl ErrorRecovery {
    pub fn new(default_strategy: RecoveryStrategy) -> Self {
        Self {
            default_strategy,
            strategies: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_strategy(&self, tool_name: &str, strategy: RecoveryStrategy) {
        self.strategies.write().insert(tool_name.to_string(), strategy);
    }

    pub fn strategy_for(&self, tool_name: &str) -> RecoveryStrategy {
        self.strategies.read().get(tool_name).cloned().unwrap_or_else(|| self.default_strategy.clone())
    }

    /// Record a failure for `tool_name` at the current time.
    pub fn record_failure(&self, tool_name: &str) {
        let mut history = self.history.write();
        let entry = history.entry(tool_name.to_string()).or_insert_with(FailureHistory::new);
        entry.records.push_back(Instant::now());
        if entry.records.len() > MAX_HISTORY_PER_TOOL {
            entry.records.pop_front();
        }
    }

    /// Number of failures recorded for `tool_name` within `window` of now.
    pub fn recent_failure_count(&self, tool_name: &str, window: Duration) -> usize {
        let history = self.history.read();
        match history.get(tool_name) {
            Some(h) => {
                let cutoff = Instant::now().checked_sub(window).unwrap_or_else(Instant::now);
                h.records.iter().filter(|&&t| t >= cutoff).count()
            }
            None => 0,
        }
    }
}

impl Clone for RecoveryStrategy {
    fn clone(&self) -> Self {
        match self {
            RecoveryStrategy::Retry { max_retries } => RecoveryStrategy::Retry { max_retries: *max_retries },
            RecoveryStrategy::Fallback { tool_name } => RecoveryStrategy::Fallback { tool_name: tool_name.clone() },
            RecoveryStrategy::Skip { default_value } => RecoveryStrategy::Skip { default_value: default_value.clone() },
            RecoveryStrategy::Error => RecoveryStrategy::Error,
        }
    }
}

impl Default for ErrorRecovery {
    fn default() -> Self {
        Self::new(RecoveryStrategy::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_for_falls_back_to_default() {
        let recovery = ErrorRecovery::new(RecoveryStrategy::Error);
        assert!(matches!(recovery.strategy_for("anything"), RecoveryStrategy::Error));
    }

    #[test]
    fn set_strategy_overrides_per_tool() {
        let recovery = ErrorRecovery::default();
        recovery.set_strategy("bash", RecoveryStrategy::Fallback { tool_name: "bash_safe".into() });
        match recovery.strategy_for("bash") {
            RecoveryStrategy::Fallback { tool_name } => assert_eq!(tool_name, "bash_safe"),
            other => panic!("unexpected strategy: {other:?}"),
        }
        assert!(matches!(recovery.strategy_for("other"), RecoveryStrategy::Error));
    }

    #[test]
    fn recent_failure_count_tracks_window() {
        let recovery = ErrorRecovery::default();
        assert_eq!(recovery.recent_failure_count("t", Duration::from_secs(60)), 0);
        recovery.record_failure("t");
        recovery.record_failure("t");
        assert_eq!(recovery.recent_failure_count("t", Duration::from_secs(60)), 2);
    }

    #[test]
    fn recent_failure_count_excludes_entries_outside_window() {
        let recovery = ErrorRecovery::default();
        recovery.record_failure("t");
        // A zero-width window should exclude the just-recorded entry in
        // all but a pathological race, since `Instant::now()` has since
        // advanced past the recorded instant.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(recovery.recent_failure_count("t", Duration::from_millis(1)), 0);
    }

    #[test]
    fn skip_strategy_carries_default_value() {
        let recovery = ErrorRecovery::default();
        recovery.set_strategy("flaky", RecoveryStrategy::Skip { default_value: serde_json::json!({"ok": false}) });
        match recovery.strategy_for("flaky") {
            RecoveryStrategy::Skip { default_value } => assert_eq!(default_value, serde_json::json!({"ok": false})),
            other => panic!("unexpected strategy: {other:?}"),
        }
    }
}

impl std::fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStrategy::Retry { max_retries } => write!(f, "Retry({max_retries})"),
            RecoveryStrategy::Fallback { tool_name } => write!(f, "Fallback({tool_name})"),
            RecoveryStrategy::Skip { default_value } => write!(f, "Skip({default_value})"),
            RecoveryStrategy::Error => write!(f, "Error"),
        }
    }
}
