//! Timeout manager (§4.4 "Timeout manager").
//!
//! Races a tool execution against a timer; on timeout the execution is
//! cancelled (via [`CancelSignal`]) and a [`crate::descriptor::ToolError::Timeout`]
//! is raised. Cleanup of the timer is guaranteed on all paths by `tokio::select!`'s
//! drop semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::{BoxFuture, ToolError};

/// Cooperative cancellation signal shared between a timed-out or cancelled
/// invocation and the tool closure it wraps.
#[derive(Clone)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Default timeout applied to a tool invocation when no override exists.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Per-tool (and optionally per-action) timeout overrides.
pub struct TimeoutManager {
    default_ms: u64,
    overrides: RwLock<HashMap<String, u64>>,
}

impl TimeoutManager {
    pub fn new(default_ms: u64) -> Self {
        Self { default_ms, overrides: RwLock::new(HashMap::new()) }
    }

    /// Register a per-tool (optionally per-action) override. `action`, when
    /// given, is appended to the tool name as `"{tool}:{action}"` so a
    /// single tool can have different budgets for different actions.
    pub fn set_override(&self, tool_name: &str, action: Option<&str>, ms: u64) {
        let key = override_key(tool_name, action);
        self.overrides.write().insert(key, ms);
    }

    /// Resolve the effective timeout for `tool_name`/`action`, falling back
    /// to the tool-level override, then the manager default.
    pub fn get_timeout(&self, tool_name: &str, action: Option<&str>) -> u64 {
        let overrides = self.overrides.read();
        if let Some(action) = action {
            if let Some(ms) = overrides.get(&override_key(tool_name, Some(action))) {
                return *ms;
            }
        }
        if let Some(ms) = overrides.get(&override_key(tool_name, None)) {
            return *ms;
        }
        self.default_ms
    }

    /// Race `fut` against a `ms`-millisecond timer. On timeout, signal
    /// `cancel` so the execution can wind down cooperatively and return a
    /// [`ToolError::Timeout`].
    pub async fn execute_with_timeout<F>(
        &self,
        tool_name: &str,
        ms: u64,
        cancel: &CancelSignal,
        fut: F,
    ) -> Result<serde_json::Value, ToolError>
    where
        F: std::future::Future<Output = Result<serde_json::Value, ToolError>>,
    {
        tokio::select! {
            result = fut => result,
            _ = tokio::time::sleep(std::time::Duration::from_millis(ms)) => {
                cancel.cancel();
                Err(ToolError::Timeout(tool_name.to_string(), ms))
            }
        }
    }

    /// Like [`execute_with_timeout`], but takes a boxed future for callers
    /// composing across `dyn` boundaries (the control plane's nested stages).
    pub async fn execute_boxed_with_timeout(
        &self,
        tool_name: &str,
        ms: u64,
        cancel: &CancelSignal,
        fut: BoxFuture<'_, Result<serde_json::Value, ToolError>>,
    ) -> Result<serde_json::Value, ToolError> {
        self.execute_with_timeout(tool_name, ms, cancel, fut).await
    }
}

fn override_key(tool_name: &str, action: Option<&str>) -> String {
    match action {
        Some(a) => format!("{tool_name}:{a}"),
        None => tool_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_timeout_falls_back_to_default() {
        let mgr = TimeoutManager::new(DEFAULT_TIMEOUT_MS);
        assert_eq!(mgr.get_timeout("bash", None), DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn get_timeout_uses_tool_override() {
        let mgr = TimeoutManager::new(DEFAULT_TIMEOUT_MS);
        mgr.set_override("bash", None, 5_000);
        assert_eq!(mgr.get_timeout("bash", None), 5_000);
        assert_eq!(mgr.get_timeout("other", None), DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn get_timeout_prefers_action_override_over_tool_override() {
        let mgr = TimeoutManager::new(DEFAULT_TIMEOUT_MS);
        mgr.set_override("bash", None, 5_000);
        mgr.set_override("bash", Some("long_run"), 60_000);
        assert_eq!(mgr.get_timeout("bash", Some("long_run")), 60_000);
        assert_eq!(mgr.get_timeout("bash", Some("other_action")), 5_000);
    }

    #[tokio::test]
    async fn execute_with_timeout_returns_value_when_fast() {
        let mgr = TimeoutManager::new(DEFAULT_TIMEOUT_MS);
        let cancel = CancelSignal::new();
        let result = mgr
            .execute_with_timeout("fast", 1_000, &cancel, async { Ok(serde_json::json!("done")) })
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("done"));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn execute_with_timeout_signals_cancel_and_errors_on_timeout() {
        let mgr = TimeoutManager::new(DEFAULT_TIMEOUT_MS);
        let cancel = CancelSignal::new();
        let result = mgr
            .execute_with_timeout("slow", 10, &cancel, async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(serde_json::json!("never"))
            })
            .await;
        assert!(matches!(result, Err(ToolError::Timeout(name, 10)) if name == "slow"));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn cancel_signal_lifecycle() {
        let signal = CancelSignal::default();
        assert!(!signal.is_cancelled());
        signal.cancel();
        assert!(signal.is_cancelled());
    }
}
