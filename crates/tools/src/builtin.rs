//! A couple of deterministic, test-only tool stubs used to exercise the
//! control plane end-to-end without shelling out to a real process. Loosely
//! grounded on `exec.rs`'s command-execution shape (request in, status/output
//! out) but trimmed to what the seed scenarios actually need.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ax_domain::tool::ParameterSchema;
use serde_json::Value;

use crate::descriptor::{ExecutionContext, ToolDescriptor, ToolError};

/// Echoes its `message` argument back verbatim. Used by scenarios that only
/// need a tool round-trip through the agent loop (S2).
pub fn echo_tool() -> ToolDescriptor {
    let mut fields = std::collections::HashMap::new();
    fields.insert(
        "message".to_string(),
        ax_domain::tool::SchemaField { schema: ParameterSchema::String, optional: false, description: None },
    );

    ToolDescriptor {
        name: "echo".to_string(),
        description: "Echo the given message back.".to_string(),
        parameter_schema: ParameterSchema::Object { fields },
        execute: Arc::new(|args: Value, _ctx: ExecutionContext| {
            Box::pin(async move { Ok(serde_json::json!({ "message": args["message"] })) })
        }),
        optional_init: None,
    }
}

/// Fails its first `fail_times` invocations with a retryable error, then
/// succeeds. Used by S5 (retry with jitter) to deterministically exercise
/// the retry manager's backoff path.
pub fn flaky_tool() -> ToolDescriptor {
    let mut fields = std::collections::HashMap::new();
    fields.insert(
        "fail_times".to_string(),
        ax_domain::tool::SchemaField { schema: ParameterSchema::Number, optional: false, description: None },
    );

    let calls = Arc::new(AtomicU32::new(0));

    ToolDescriptor {
        name: "flaky".to_string(),
        description: "Fails a configured number of times before succeeding.".to_string(),
        parameter_schema: ParameterSchema::Object { fields },
        execute: Arc::new(move |args: Value, _ctx: ExecutionContext| {
            let calls = calls.clone();
            Box::pin(async move {
                let fail_times = args["fail_times"].as_u64().unwrap_or(0) as u32;
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt < fail_times {
                    Err(ToolError::Execution("flaky".to_string(), "ETIMEDOUT: simulated transient failure".to_string()))
                } else {
                    Ok(serde_json::json!({ "attempt": attempt }))
                }
            })
        }),
        optional_init: None,
    }
}

/// Sleeps for `hold_ms` before returning, to drive S6's concurrency-queue-
/// ordering scenario under a real control plane (rather than calling
/// `ConcurrencyManager` directly, as `concurrency.rs`'s own unit test does).
pub fn slow_tool() -> ToolDescriptor {
    let mut fields = std::collections::HashMap::new();
    fields.insert(
        "hold_ms".to_string(),
        ax_domain::tool::SchemaField { schema: ParameterSchema::Number, optional: false, description: None },
    );

    ToolDescriptor {
        name: "slow".to_string(),
        description: "Holds its concurrency slot for hold_ms before returning.".to_string(),
        parameter_schema: ParameterSchema::Object { fields },
        execute: Arc::new(|args: Value, _ctx: ExecutionContext| {
            Box::pin(async move {
                let hold_ms = args["hold_ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(std::time::Duration::from_millis(hold_ms)).await;
                Ok(serde_json::json!({ "held_ms": hold_ms }))
            })
        }),
        optional_init: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeout::CancelSignal;

    fn ctx() -> ExecutionContext {
        ExecutionContext { session_id: "s1".to_string(), cancel: CancelSignal::new() }
    }

    #[tokio::test]
    async fn echo_tool_returns_message() {
        let tool = echo_tool();
        let result = (tool.execute)(serde_json::json!({"message": "hi"}), ctx()).await.unwrap();
        assert_eq!(result["message"], "hi");
    }

    #[tokio::test]
    async fn flaky_tool_fails_then_succeeds() {
        let tool = flaky_tool();
        let first = (tool.execute)(serde_json::json!({"fail_times": 2}), ctx()).await;
        assert!(first.is_err());
        let second = (tool.execute)(serde_json::json!({"fail_times": 2}), ctx()).await;
        assert!(second.is_err());
        let third = (tool.execute)(serde_json::json!({"fail_times": 2}), ctx()).await.unwrap();
        assert_eq!(third["attempt"], 2);
    }

    #[tokio::test]
    async fn slow_tool_holds_for_requested_duration() {
        let tool = slow_tool();
        let started = std::time::Instant::now();
        let result = (tool.execute)(serde_json::json!({"hold_ms": 20}), ctx()).await.unwrap();
        assert!(started.elapsed().as_millis() >= 20);
        assert_eq!(result["held_ms"], 20);
    }
}
