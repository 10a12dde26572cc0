//! Tool control plane (§4.4): composes recovery, retry, timeout, and
//! concurrency around a tool's raw execution, in the spec's wrapping
//! order — *recovery policy → retry → timeout → concurrency slot →
//! execute* — with concurrency innermost so that queue wait time is
//! charged against `max_wait_ms`, not the retry/timeout budget.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::concurrency::{ConcurrencyManager, DEFAULT_CONCURRENCY_MAX_WAIT_MS};
use crate::descriptor::{ExecutionContext, ToolDescriptor, ToolError};
use crate::metrics::MetricsCollector;
use crate::recovery::{ErrorRecovery, RecoveryStrategy};
use crate::retry::RetryManager;
use crate::timeout::{CancelSignal, TimeoutManager};

/// Bundles the four control-plane stages plus the tool registry they wrap.
pub struct ControlPlane {
    pub timeout: TimeoutManager,
    pub retry: RetryManager,
    pub concurrency: ConcurrencyManager,
    pub recovery: ErrorRecovery,
    pub metrics: MetricsCollector,
    tools: RwLock<HashMap<String, ToolDescriptor>>,
    max_wait_ms: u64,
}

impl ControlPlane {
    pub fn new(
        timeout: TimeoutManager,
        retry: RetryManager,
        concurrency: ConcurrencyManager,
        recovery: ErrorRecovery,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            timeout,
            retry,
            concurrency,
            recovery,
            metrics,
            tools: RwLock::new(HashMap::new()),
            max_wait_ms: DEFAULT_CONCURRENCY_MAX_WAIT_MS,
        }
    }

    pub fn register(&self, tool: ToolDescriptor) {
        self.tools.write().insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(name).cloned()
    }

    /// Every registered tool rendered as a provider-facing definition,
    /// sorted by name for stable ordering across calls.
    pub fn definitions(&self) -> Vec<ax_domain::tool::ToolDefinition> {
        let tools = self.tools.read();
        let mut defs: Vec<_> = tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Validate arguments, then drive `tool_name`'s invocation through the
    /// full control plane, applying the recovery strategy if the
    /// retry/timeout/concurrency pipeline is ultimately exhausted.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        ctx: ExecutionContext,
    ) -> Result<Value, ToolError> {
        let tool = self.get(tool_name).ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        let violations = tool.validate_args(&args);
        if !violations.is_empty() {
            return Err(ToolError::InvalidArguments { tool: tool_name.to_string(), violations });
        }

        self.execute_with_recovery(&tool, args, ctx).await
    }

    async fn execute_with_recovery(
        &self,
        tool: &ToolDescriptor,
        args: Value,
        ctx: ExecutionContext,
    ) -> Result<Value, ToolError> {
        let started = std::time::Instant::now();
        let result = self.execute_with_retry_timeout_concurrency(tool, args.clone(), ctx.clone()).await;

        match result {
            Ok(v) => {
                self.metrics.record(&tool.name, true, started.elapsed().as_millis() as u64);
                Ok(v)
            }
            Err(e) => {
                self.metrics.record(&tool.name, false, started.elapsed().as_millis() as u64);
                self.recovery.record_failure(&tool.name);
                self.apply_recovery(tool, args, ctx, e).await
            }
        }
    }

    fn apply_recovery<'a>(
        &'a self,
        tool: &'a ToolDescriptor,
        args: Value,
        ctx: ExecutionContext,
        err: ToolError,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, ToolError>> + Send + 'a>> {
        Box::pin(async move {
            match self.recovery.strategy_for(&tool.name) {
                RecoveryStrategy::Error => Err(err),
                RecoveryStrategy::Skip { default_value } => Ok(default_value),
                RecoveryStrategy::Fallback { tool_name } => {
                    let fallback = self
                        .get(&tool_name)
                        .ok_or_else(|| ToolError::NotFound(tool_name.clone()))?;
                    self.execute_with_recovery(&fallback, args, ctx).await
                }
                RecoveryStrategy::Retry { max_retries } => {
                    let mut last_err = err;
                    for _ in 0..max_retries {
                        match self
                            .execute_with_retry_timeout_concurrency(tool, args.clone(), ctx.clone())
                            .await
                        {
                            Ok(v) => return Ok(v),
                            Err(e) => last_err = e,
                        }
                    }
                    Err(last_err)
                }
            }
        })
    }

    async fn execute_with_retry_timeout_concurrency(
        &self,
        tool: &ToolDescriptor,
        args: Value,
        ctx: ExecutionContext,
    ) -> Result<Value, ToolError> {
        let max_wait_ms = self.max_wait_ms;

        self.retry
            .run_with_retry(&tool.name, || {
                let tool = tool.clone();
                let args = args.clone();
                let ctx = ctx.clone();
                async move {
                    let timeout_ms = self.timeout.get_timeout(&tool.name, None);
                    let cancel = ctx.cancel.clone();
                    self.timeout
                        .execute_with_timeout(&tool.name, timeout_ms, &cancel, self.acquire_and_run(tool, args, ctx, max_wait_ms))
                        .await
                }
            })
            .await
            .map(|(v, _attempts)| v)
    }

    async fn acquire_and_run(
        &self,
        tool: ToolDescriptor,
        args: Value,
        ctx: ExecutionContext,
        max_wait_ms: u64,
    ) -> Result<Value, ToolError> {
        let (guard, _wait_ms) = self.concurrency.acquire_slot(&tool.name, max_wait_ms).await?;
        let result = (tool.execute)(args, ctx).await;
        self.concurrency.release_slot(guard);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::RecoveryStrategy;
    use crate::retry::RetryPolicy;
    use ax_domain::tool::ParameterSchema;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn plane() -> ControlPlane {
        ControlPlane::new(
            TimeoutManager::new(1_000),
            RetryManager::new(RetryPolicy { max_retries: 2, base_delay_ms: 1, max_delay_ms: 2, backoff_multiplier: 2.0, jitter: false, retryable_patterns: vec!["etimedout".into()] }),
            ConcurrencyManager::new(4),
            ErrorRecovery::new(RecoveryStrategy::Error),
            MetricsCollector::default(),
        )
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext { session_id: "s1".into(), cancel: CancelSignal::new() }
    }

    #[test]
    fn definitions_lists_registered_tools_sorted_by_name() {
        let plane = plane();
        plane.register(ok_tool("zulu"));
        plane.register(ok_tool("alpha"));
        let names: Vec<_> = plane.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zulu".to_string()]);
    }

    fn ok_tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: "test".into(),
            parameter_schema: ParameterSchema::Object { fields: Default::default() },
            execute: Arc::new(|args, _ctx| Box::pin(async move { Ok(args) })),
            optional_init: None,
        }
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_not_found() {
        let plane = plane();
        let err = plane.execute("ghost", serde_json::json!({}), ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn execute_invalid_args_short_circuits_before_retry() {
        let plane = plane();
        let mut fields = std::collections::HashMap::new();
        fields.insert("x".to_string(), ax_domain::tool::SchemaField { schema: ParameterSchema::String, optional: false, description: None });
        plane.register(ToolDescriptor {
            name: "needs_x".into(),
            description: "".into(),
            parameter_schema: ParameterSchema::Object { fields },
            execute: Arc::new(|args, _ctx| Box::pin(async move { Ok(args) })),
            optional_init: None,
        });

        let err = plane.execute("needs_x", serde_json::json!({}), ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn execute_runs_happy_path_and_records_metrics() {
        let plane = plane();
        plane.register(ok_tool("echo"));

        let result = plane.execute("echo", serde_json::json!({"v": 1}), ctx()).await.unwrap();
        assert_eq!(result, serde_json::json!({"v": 1}));

        let stats = plane.metrics.snapshot("echo").unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.success, 1);
    }

    #[tokio::test]
    async fn execute_retries_transient_failures_then_succeeds() {
        let plane = plane();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_for_closure = calls.clone();

        plane.register(ToolDescriptor {
            name: "flaky".into(),
            description: "".into(),
            parameter_schema: ParameterSchema::Object { fields: Default::default() },
            execute: Arc::new(move |args, _ctx| {
                let calls = calls_for_closure.clone();
                Box::pin(async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 1 {
                        Err(ToolError::Execution("flaky".into(), "ETIMEDOUT".into()))
                    } else {
                        Ok(args)
                    }
                })
            }),
            optional_init: None,
        });

        let result = plane.execute("flaky", serde_json::json!({}), ctx()).await.unwrap();
        assert_eq!(result, serde_json::json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn execute_applies_skip_recovery_after_exhausting_retries() {
        let plane = plane();
        plane.recovery.set_strategy("always_fails", RecoveryStrategy::Skip { default_value: serde_json::json!("fallback") });
        plane.register(ToolDescriptor {
            name: "always_fails".into(),
            description: "".into(),
            parameter_schema: ParameterSchema::Object { fields: Default::default() },
            execute: Arc::new(|_args, _ctx| Box::pin(async move { Err(ToolError::Execution("always_fails".into(), "permanent".into())) })),
            optional_init: None,
        });

        let result = plane.execute("always_fails", serde_json::json!({}), ctx()).await.unwrap();
        assert_eq!(result, serde_json::json!("fallback"));
    }

    #[tokio::test]
    async fn execute_applies_fallback_recovery_to_another_tool() {
        let plane = plane();
        plane.register(ok_tool("primary_fallback_target"));
        plane.recovery.set_strategy(
            "primary",
            RecoveryStrategy::Fallback { tool_name: "primary_fallback_target".into() },
        );
        plane.register(ToolDescriptor {
            name: "primary".into(),
            description: "".into(),
            parameter_schema: ParameterSchema::Object { fields: Default::default() },
            execute: Arc::new(|_args, _ctx| Box::pin(async move { Err(ToolError::Execution("primary".into(), "permanent".into())) })),
            optional_init: None,
        });

        let result = plane.execute("primary", serde_json::json!({"v": 7}), ctx()).await.unwrap();
        assert_eq!(result, serde_json::json!({"v": 7}));
    }
}
