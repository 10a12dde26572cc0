use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `{id, type, timestamp, metadata, payload}` (§3 DATA MODEL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    /// The trigger session id, when this event is session-scoped.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            session_id: None,
            metadata: HashMap::new(),
            payload,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Record a rule-handler failure as metadata without aborting dispatch
    /// (§4.2: "Rule errors are logged and do not prevent subscriber delivery").
    pub fn record_rule_error(&mut self, rule_index: usize, message: impl Into<String>) {
        self.metadata
            .insert(format!("rule_error_{rule_index}"), serde_json::Value::String(message.into()));
    }
}

/// How a `Rule` selects which events it applies to (§4.2, §9 "a concrete
/// type, a list, or `*`").
#[derive(Clone, Debug)]
pub enum EventMatch {
    Type(String),
    List(Vec<String>),
    Wildcard,
}

impl EventMatch {
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            EventMatch::Type(t) => t == event_type,
            EventMatch::List(list) => list.iter().any(|t| t == event_type),
            EventMatch::Wildcard => true,
        }
    }
}

/// Rule handler kind (§9 "Dynamically composed event handlers"): either a
/// direct in-process function, or an agent-prompt descriptor that re-enters
/// the agent loop on a dedicated sub-session.
#[derive(Clone)]
pub enum Handler {
    Function(Arc<dyn Fn(&Event) -> BoxFuture<'static, ()> + Send + Sync>),
    Agent { prompt: String },
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Function(_) => write!(f, "Handler::Function(..)"),
            Handler::Agent { prompt } => f.debug_struct("Handler::Agent").field("prompt", prompt).finish(),
        }
    }
}

/// `{event_type, handler, priority}` (§4.2). Higher priority runs first;
/// rules of equal priority run in registration order (stable).
#[derive(Clone, Debug)]
pub struct Rule {
    pub id: String,
    pub event_match: EventMatch,
    pub handler: Handler,
    pub priority: i32,
}

impl Rule {
    pub fn new(event_match: EventMatch, handler: Handler, priority: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_match,
            handler,
            priority,
        }
    }
}
