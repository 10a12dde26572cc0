use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A session: an opaque id, a title, timestamps, and its ordered messages.
///
/// Mutated only through session-store operations; not durable in the core
/// (destroyed on explicit delete or process exit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(id: impl Into<String>, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        let now = Utc::now();
        // updatedAt must be monotonically non-decreasing (§8 invariant 1).
        if now >= self.updated_at {
            self.updated_at = now;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a session: `{id, role, timestamp, parts[]}` (§3 DATA MODEL).
///
/// Message identity is stable once created; `parts` are append-only during
/// streaming and considered finalized once the turn completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            timestamp: Utc::now(),
            parts: Vec::new(),
        }
    }

    pub fn with_id(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            timestamp: Utc::now(),
            parts: Vec::new(),
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        let mut m = Self::new(role);
        m.parts.push(Part::Text { text: text.into() });
        m
    }

    /// Join every `Text` part with a newline; other part kinds are skipped.
    pub fn extract_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> Vec<&Part> {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::ToolCall { .. }))
            .collect()
    }
}

/// An ordered, typed fragment of a message (§3 DATA MODEL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    CompactionSummary {
        summary: String,
    },
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    Audio {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    File {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_joins_text_parts_only() {
        let mut m = Message::new(Role::Assistant);
        m.parts.push(Part::Text { text: "line one".into() });
        m.parts.push(Part::ToolCall {
            tool_call_id: "tc1".into(),
            tool_name: "bash".into(),
            arguments: serde_json::json!({}),
        });
        m.parts.push(Part::Text { text: "line two".into() });
        assert_eq!(m.extract_text(), "line one\nline two");
    }

    #[test]
    fn touch_never_moves_updated_at_backwards() {
        let mut s = Session::new("s1", None);
        let before = s.updated_at;
        s.touch();
        assert!(s.updated_at >= before);
    }

    #[test]
    fn tool_calls_filters_other_parts() {
        let mut m = Message::new(Role::Assistant);
        m.parts.push(Part::Text { text: "hi".into() });
        m.parts.push(Part::ToolCall {
            tool_call_id: "tc1".into(),
            tool_name: "bash".into(),
            arguments: serde_json::json!({"command": "echo hi"}),
        });
        assert_eq!(m.tool_calls().len(), 1);
    }
}
