use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters, rendered from `ParameterSchema`.
    pub parameters: serde_json::Value,
}

/// A message in the conversation (provider-agnostic). This is the wire
/// shape the transform layer and provider adapters operate on; it is
/// distinct from `session::Message`, which is the stored history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(rename = "image")]
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
        }
    }

    /// `true` when this message carries no meaningful content — used by the
    /// Anthropic transform to drop empty messages (§4.5, §8 boundary case).
    pub fn is_empty_content(&self) -> bool {
        match &self.content {
            MessageContent::Text(t) => t.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text` variant, returns the string directly.
    /// For `Parts` variant, joins all `Text` parts with `"\n"`.
    /// Non-text parts (ToolUse, ToolResult, Image) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dynamic parameter schemas (§9 "Dynamic parameter schemas")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tagged variant over the field types a tool parameter schema can use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterSchema {
    String,
    Number,
    Boolean,
    Enum { variants: Vec<String> },
    Array { items: Box<ParameterSchema> },
    Object { fields: HashMap<String, SchemaField> },
    Union { options: Vec<ParameterSchema> },
}

/// A field within an `Object` schema: its type, whether it is optional, and
/// an optional human-readable description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub schema: ParameterSchema,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// A single schema violation: the JSON-pointer-like path, what was
/// expected, and what was found.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaViolation {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

impl ParameterSchema {
    /// Validate a JSON value against this schema, returning every
    /// violation found (empty = valid).
    pub fn validate(&self, value: &serde_json::Value) -> Vec<SchemaViolation> {
        self.validate_at("$", value)
    }

    fn validate_at(&self, path: &str, value: &serde_json::Value) -> Vec<SchemaViolation> {
        match self {
            ParameterSchema::String => {
                if value.is_string() {
                    vec![]
                } else {
                    vec![mismatch(path, "string", value)]
                }
            }
            ParameterSchema::Number => {
                if value.is_number() {
                    vec![]
                } else {
                    vec![mismatch(path, "number", value)]
                }
            }
            ParameterSchema::Boolean => {
                if value.is_boolean() {
                    vec![]
                } else {
                    vec![mismatch(path, "boolean", value)]
                }
            }
            ParameterSchema::Enum { variants } => match value.as_str() {
                Some(s) if variants.iter().any(|v| v == s) => vec![],
                _ => vec![mismatch(path, &format!("one of {variants:?}"), value)],
            },
            ParameterSchema::Array { items } => match value.as_array() {
                Some(arr) => arr
                    .iter()
                    .enumerate()
                    .flat_map(|(i, v)| items.validate_at(&format!("{path}[{i}]"), v))
                    .collect(),
                None => vec![mismatch(path, "array", value)],
            },
            ParameterSchema::Object { fields } => match value.as_object() {
                Some(obj) => {
                    let mut errors = Vec::new();
                    for (name, field) in fields {
                        match obj.get(name) {
                            Some(v) => errors.extend(field.schema.validate_at(&format!("{path}.{name}"), v)),
                            None if !field.optional => errors.push(SchemaViolation {
                                path: format!("{path}.{name}"),
                                expected: "present".into(),
                                actual: "missing".into(),
                            }),
                            None => {}
                        }
                    }
                    errors
                }
                None => vec![mismatch(path, "object", value)],
            },
            ParameterSchema::Union { options } => {
                if options.iter().any(|o| o.validate_at(path, value).is_empty()) {
                    vec![]
                } else {
                    vec![mismatch(path, "matching one union variant", value)]
                }
            }
        }
    }
}

fn mismatch(path: &str, expected: &str, actual: &serde_json::Value) -> SchemaViolation {
    SchemaViolation {
        path: path.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "line one".into() },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text { text: "line two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn extract_all_text_empty_parts() {
        let content = MessageContent::Parts(vec![]);
        assert_eq!(content.extract_all_text(), "");
    }

    #[test]
    fn is_empty_content_detects_blank_text() {
        assert!(Message::assistant("").is_empty_content());
        assert!(!Message::assistant("hi").is_empty_content());
        assert!(Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![]),
        }
        .is_empty_content());
    }

    #[test]
    fn schema_validate_simple_object() {
        let mut fields = HashMap::new();
        fields.insert(
            "command".to_string(),
            SchemaField { schema: ParameterSchema::String, optional: false, description: None },
        );
        fields.insert(
            "timeout".to_string(),
            SchemaField { schema: ParameterSchema::Number, optional: true, description: None },
        );
        let schema = ParameterSchema::Object { fields };

        let valid = serde_json::json!({"command": "echo hi"});
        assert!(schema.validate(&valid).is_empty());

        let missing = serde_json::json!({});
        let violations = schema.validate(&missing);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$.command");
    }

    #[test]
    fn schema_validate_array_reports_index_path() {
        let schema = ParameterSchema::Array { items: Box::new(ParameterSchema::Number) };
        let violations = schema.validate(&serde_json::json!([1, "oops", 3]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$[1]");
    }

    #[test]
    fn schema_validate_enum_rejects_unknown_variant() {
        let schema = ParameterSchema::Enum { variants: vec!["retry".into(), "skip".into()] };
        assert!(schema.validate(&serde_json::json!("retry")).is_empty());
        assert_eq!(schema.validate(&serde_json::json!("explode")).len(), 1);
    }

    #[test]
    fn schema_validate_union_accepts_any_matching_option() {
        let schema = ParameterSchema::Union {
            options: vec![ParameterSchema::String, ParameterSchema::Number],
        };
        assert!(schema.validate(&serde_json::json!("x")).is_empty());
        assert!(schema.validate(&serde_json::json!(42)).is_empty());
        assert_eq!(schema.validate(&serde_json::json!(true)).len(), 1);
    }
}
