//! Tool descriptors: the static metadata plus execution closure that the
//! control plane wraps (§4.4, §9 "Dynamic parameter schemas").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ax_domain::tool::ParameterSchema;
use serde_json::Value;

/// Per-invocation context handed to a tool's execute closure.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Session this invocation belongs to, for logging/metrics correlation.
    pub session_id: String,
    /// Cooperative cancellation signal, checked by well-behaved tools and
    /// propagated by [`crate::timeout::TimeoutManager::execute_with_timeout`].
    pub cancel: crate::timeout::CancelSignal,
}

/// Errors a tool execution, or the control plane wrapping it, can surface.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),

    #[error("invalid arguments for '{tool}': {violations:?}")]
    InvalidArguments { tool: String, violations: Vec<ax_domain::tool::SchemaViolation> },

    #[error("tool '{0}' timed out after {1}ms")]
    Timeout(String, u64),

    #[error("tool '{0}' was cancelled")]
    Cancelled(String),

    #[error("tool '{tool}' exceeded concurrency wait of {max_wait_ms}ms")]
    ConcurrencyTimeout { tool: String, max_wait_ms: u64 },

    #[error("tool '{0}' execution failed: {1}")]
    Execution(String, String),
}

impl From<ToolError> for ax_domain::error::Error {
    fn from(e: ToolError) -> Self {
        ax_domain::error::Error::Tool(e.to_string())
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The async execute closure a tool registers. Takes validated arguments
/// and the invocation context, returns the tool's raw JSON result.
pub type ToolExecuteFn =
    Arc<dyn Fn(Value, ExecutionContext) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// Optional one-time initialization hook, run before a tool's first use.
pub type ToolInitFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), ToolError>> + Send + Sync>;

/// A registered tool: its metadata, parameter schema, and executor.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: ParameterSchema,
    pub execute: ToolExecuteFn,
    pub optional_init: Option<ToolInitFn>,
}

impl ToolDescriptor {
    /// Validate `args` against this tool's schema, returning violations
    /// (empty = valid).
    pub fn validate_args(&self, args: &Value) -> Vec<ax_domain::tool::SchemaViolation> {
        self.parameter_schema.validate(args)
    }

    /// Render the tool as the provider-facing [`ax_domain::tool::ToolDefinition`].
    pub fn to_definition(&self) -> ax_domain::tool::ToolDefinition {
        ax_domain::tool::ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: render_schema(&self.parameter_schema),
        }
    }
}

/// Render a [`ParameterSchema`] as a JSON-Schema-shaped value for the
/// provider-facing tool definition. This is a display concern only —
/// [`ParameterSchema::validate`] is the source of truth for correctness.
fn render_schema(schema: &ParameterSchema) -> Value {
    use ax_domain::tool::ParameterSchema as P;
    match schema {
        P::String => serde_json::json!({ "type": "string" }),
        P::Number => serde_json::json!({ "type": "number" }),
        P::Boolean => serde_json::json!({ "type": "boolean" }),
        P::Enum { variants } => serde_json::json!({ "type": "string", "enum": variants }),
        P::Array { items } => serde_json::json!({ "type": "array", "items": render_schema(items) }),
        P::Object { fields } => {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for (name, field) in fields {
                properties.insert(name.clone(), render_schema(&field.schema));
                if !field.optional {
                    required.push(name.clone());
                }
            }
            serde_json::json!({ "type": "object", "properties": properties, "required": required })
        }
        P::Union { options } => serde_json::json!({ "anyOf": options.iter().map(render_schema).collect::<Vec<_>>() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax_domain::tool::SchemaField;
    use std::collections::HashMap;

    fn echo_tool() -> ToolDescriptor {
        let mut fields = HashMap::new();
        fields.insert(
            "message".to_string(),
            SchemaField { schema: ParameterSchema::String, optional: false, description: None },
        );
        ToolDescriptor {
            name: "echo".into(),
            description: "echoes its input".into(),
            parameter_schema: ParameterSchema::Object { fields },
            execute: Arc::new(|args, _ctx| Box::pin(async move { Ok(args) })),
            optional_init: None,
        }
    }

    #[test]
    fn validate_args_reports_missing_required_field() {
        let tool = echo_tool();
        let violations = tool.validate_args(&serde_json::json!({}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$.message");
    }

    #[test]
    fn validate_args_passes_for_well_formed_input() {
        let tool = echo_tool();
        assert!(tool.validate_args(&serde_json::json!({"message": "hi"})).is_empty());
    }

    #[test]
    fn to_definition_renders_required_fields() {
        let tool = echo_tool();
        let def = tool.to_definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.parameters["required"], serde_json::json!(["message"]));
    }

    #[tokio::test]
    async fn execute_closure_runs() {
        let tool = echo_tool();
        let ctx = ExecutionContext { session_id: "s1".into(), cancel: crate::timeout::CancelSignal::new() };
        let result = (tool.execute)(serde_json::json!({"message": "hi"}), ctx).await.unwrap();
        assert_eq!(result["message"], "hi");
    }
}
