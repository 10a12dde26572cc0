//! Environment Orchestrator (§4.8).
//!
//! Generalized from the teacher's flat `AppState` (one struct holding every
//! service the API handlers touch) into the typed hub that owns the event
//! bus, wires the default rule table, and exposes the operations the REST
//! surface and SSE plane call into.

use std::collections::HashMap;
use std::sync::Arc;

use ax_domain::config::{Config, McpConfig};
use ax_domain::event::{Event, EventMatch, Handler, Rule};
use ax_domain::model::ModelCapabilities;
use ax_domain::tool::ToolDefinition;
use ax_mcp::McpManager;
use ax_providers::{RecencyList, Selection};
use ax_providers::registry::ProviderRegistry;
use ax_sessions::SessionStore;
use ax_tools::ControlPlane;
use tokio::sync::RwLock as AsyncRwLock;

use crate::bus::EventBus;
use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::{SessionBusy, SessionLockMap};
use crate::runtime::turn::{self, TurnInput};

/// Shared services every API handler and rule closure operates on.
pub struct Orchestrator {
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub recency: Arc<RecencyList>,
    pub sessions: Arc<SessionStore>,
    pub tools: Arc<ControlPlane>,
    /// Async-locked so `switch_environment` (§4.8) can disconnect and
    /// reconnect servers in place without tearing down the whole manager.
    pub mcp: Arc<AsyncRwLock<McpManager>>,
    pub bus: Arc<EventBus>,
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,
    /// Interleaved-reasoning capability lookup keyed `"provider_id/model"`
    /// (§4.3 last paragraph). Populated at bootstrap from whatever model
    /// metadata the deployment supplies; empty means no model in this
    /// deployment requires lifting.
    pub model_capabilities: HashMap<String, ModelCapabilities>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        llm: Arc<ProviderRegistry>,
        sessions: Arc<SessionStore>,
        tools: Arc<ControlPlane>,
        mcp: Arc<AsyncRwLock<McpManager>>,
        model_capabilities: HashMap<String, ModelCapabilities>,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            config,
            llm,
            recency: Arc::new(RecencyList::new()),
            sessions,
            tools,
            mcp,
            bus: Arc::new(EventBus::new()),
            session_locks: Arc::new(SessionLockMap::new()),
            cancel_map: Arc::new(CancelMap::new()),
            model_capabilities,
        });
        orchestrator.register_default_rules();
        orchestrator
    }

    /// Every tool definition the model should see: control-plane-registered
    /// tools plus MCP-discovered tools, namespaced `mcp:<server>:<tool>`
    /// per the teacher's `mcp:{server_id}:{tool}` convention.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.definitions();
        let mcp = self.mcp.read().await;
        for (server_id, tool) in mcp.list_tools() {
            defs.push(ToolDefinition {
                name: format!("mcp:{server_id}:{}", tool.name),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            });
        }
        defs
    }

    /// Switch the model used for `session_id` (§4.8): validate the
    /// candidate against the registry, record it as the session's recency
    /// selection so the next turn picks it up, and announce the change.
    pub async fn switch_model(&self, session_id: &str, provider_id: &str, model: &str) -> ax_domain::error::Result<()> {
        if !self.llm.is_valid_model(provider_id, model) {
            return Err(ax_domain::error::Error::Config(format!("model '{provider_id}/{model}' is not valid")));
        }
        self.recency.record(session_id, Selection { provider_id: provider_id.to_string(), model: model.to_string() });
        self.publish_event(
            Event::new(
                "environment.switched",
                serde_json::json!({"kind": "model", "providerId": provider_id, "model": model}),
            )
            .with_session(session_id.to_string()),
        )
        .await;
        Ok(())
    }

    /// Swap the MCP environment live (§4.8 "Environment switch flow"):
    /// quiesce every currently connected server, reconnect under
    /// `new_config`'s server list, then announce the change. `session_id`
    /// is only used to scope the announcement; the swap itself is global.
    pub async fn switch_environment(&self, session_id: &str, new_config: &McpConfig) -> ax_domain::error::Result<()> {
        let target = new_config.effective_servers();

        {
            let mut mcp = self.mcp.write().await;
            for id in mcp.server_ids() {
                mcp.disconnect(&id).await;
            }
            for server_config in &target {
                if let Err(e) = mcp.connect(&server_config.id, server_config.clone()).await {
                    tracing::warn!(
                        server_id = %server_config.id,
                        error = %e,
                        "failed to connect MCP server during environment switch"
                    );
                }
            }
        }

        self.publish_event(
            Event::new("environment.switched", serde_json::json!({"kind": "mcp", "serverCount": target.len()}))
                .with_session(session_id.to_string()),
        )
        .await;
        Ok(())
    }

    pub fn model_selection(&self, session_id: &str, requested: Option<&str>) -> ax_domain::error::Result<Selection> {
        ax_providers::select_model(&self.llm, &self.recency, session_id, requested, self.config.llm.default_model.as_deref())
    }

    pub async fn publish_event(&self, event: Event) {
        self.bus.publish(event).await;
    }

    /// Queue a user query for a session. Non-blocking: if a turn is
    /// already running and another is already queued, rejects immediately
    /// with [`SessionBusy`] rather than growing the queue (Open Question a).
    pub fn handle_query(self: &Arc<Self>, session_id: String, text: String, model: Option<String>) -> Result<(), SessionBusy> {
        if self.session_locks.is_busy(&session_id) {
            return Err(SessionBusy);
        }

        let cancel = self.cancel_map.register(&session_id);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let permit = match orchestrator.session_locks.acquire(&session_id).await {
                Ok(permit) => permit,
                Err(_busy) => {
                    orchestrator.cancel_map.remove(&session_id);
                    return;
                }
            };

            turn::run_turn(orchestrator.clone(), cancel, TurnInput { session_id: session_id.clone(), user_text: text, model }).await;

            drop(permit);
            orchestrator.cancel_map.remove(&session_id);
        });

        Ok(())
    }

    /// Cancel the in-flight turn for a session, if any. Returns `true` if a
    /// turn was actually running.
    pub fn interrupt(&self, session_id: &str) -> bool {
        self.cancel_map.cancel(session_id)
    }

    fn register_default_rules(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.bus.set_agent_dispatch(Arc::new(move |prompt: String, event: Event| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(orchestrator) = weak.upgrade() else { return };
                if is_internal_event_type(&event.event_type) {
                    return;
                }
                let Some(session_id) = event.session_id.clone() else {
                    tracing::debug!(event_type = %event.event_type, "agent rule matched a session-less event, dropping");
                    return;
                };
                let text = format!("{prompt}\n\nTriggering event: {}\nDetails: {}", event.event_type, event.payload);
                if orchestrator.handle_query(session_id.clone(), text, None).is_err() {
                    tracing::warn!(
                        session_id = %session_id,
                        event_type = %event.event_type,
                        "agent rule: session busy, synthesized prompt dropped"
                    );
                }
            })
        }));

        let weak = Arc::downgrade(self);
        self.bus.register_rule(Rule::new(
            EventMatch::Type("user_query".into()),
            Handler::Function(Arc::new(move |event: &Event| {
                let weak = weak.clone();
                let event = event.clone();
                Box::pin(async move {
                    let Some(orchestrator) = weak.upgrade() else { return };
                    let Some(session_id) = event.session_id.clone() else { return };
                    let text = event.payload.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let model = event.payload.get("model").and_then(|v| v.as_str()).map(str::to_string);
                    if orchestrator.handle_query(session_id.clone(), text, model).is_err() {
                        tracing::warn!(session_id = %session_id, "user_query rule: session busy, query dropped");
                    }
                })
            })),
            100,
        ));

        self.bus.register_rule(Rule::new(
            EventMatch::List(vec!["session.created".into(), "session.updated".into(), "session.deleted".into()]),
            Handler::Function(Arc::new(|event: &Event| {
                let event = event.clone();
                Box::pin(async move {
                    tracing::debug!(event_type = %event.event_type, session_id = ?event.session_id, "session lifecycle event");
                })
            })),
            50,
        ));

        self.bus.register_rule(Rule::new(
            EventMatch::List(vec!["background_task.completed".into(), "background_task.failed".into()]),
            Handler::Agent {
                prompt: "A background task just finished. Inspect its outcome below, diagnose the cause if it \
                         failed, and report the result back to the user."
                    .into(),
            },
            80,
        ));

        self.bus.register_rule(Rule::new(
            EventMatch::Type("environment.switched".into()),
            Handler::Agent {
                prompt: "The active environment (model or MCP tool set) just switched. Announce the change to \
                         the user and flag anything about it relevant to the current task."
                    .into(),
            },
            80,
        ));

        self.bus.register_rule(Rule::new(
            EventMatch::Wildcard,
            Handler::Agent { prompt: "An event occurred with no dedicated rule. Decide whether it needs the user's attention.".into() },
            10,
        ));
    }
}

/// Event types the wildcard/background/environment `Handler::Agent` rules
/// must never re-enter the loop for: internal wire telemetry the agent
/// loop itself emits (`stream.*`), already-handled lifecycle types, and
/// `user_query` (handled by its own `Handler::Function` rule above).
/// Without this guard the wildcard rule would dispatch a fresh turn for
/// every `stream.*` event a turn produces, recursing forever.
fn is_internal_event_type(event_type: &str) -> bool {
    event_type.starts_with("stream.")
        || event_type.starts_with("server.")
        || event_type.starts_with("session.")
        || event_type == "user_query"
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax_domain::config::{Config, LlmConfig};

    fn test_orchestrator() -> Arc<Orchestrator> {
        let config = Arc::new(Config { llm: LlmConfig::default(), ..Default::default() });
        let llm = Arc::new(ProviderRegistry::from_config(&config.llm).unwrap());
        Orchestrator::new(
            config,
            llm,
            Arc::new(SessionStore::new()),
            Arc::new(ControlPlane::default()),
            Arc::new(AsyncRwLock::new(McpManager::empty())),
            HashMap::new(),
        )
    }

    #[test]
    fn new_registers_default_rule_table() {
        let orchestrator = test_orchestrator();
        assert_eq!(orchestrator.bus.rule_count(), 5);
    }

    #[tokio::test]
    async fn user_query_event_queues_a_turn_without_blocking_publish() {
        let orchestrator = test_orchestrator();
        let session = orchestrator.sessions.create(None);
        orchestrator
            .publish_event(Event::new("user_query", serde_json::json!({"content": "hi"})).with_session(session.id.clone()))
            .await;
        // No providers configured, so the spawned turn will fail fast; the
        // important assertion is that publish_event itself didn't block.
        assert!(orchestrator.session_locks.session_count() <= 1);
    }

    #[test]
    fn interrupt_on_unknown_session_is_false() {
        let orchestrator = test_orchestrator();
        assert!(!orchestrator.interrupt("ghost"));
    }

    #[test]
    fn internal_event_types_are_excluded_from_agent_fallback() {
        assert!(is_internal_event_type("stream.text"));
        assert!(is_internal_event_type("server.heartbeat"));
        assert!(is_internal_event_type("session.created"));
        assert!(is_internal_event_type("user_query"));
        assert!(!is_internal_event_type("background_task.completed"));
        assert!(!is_internal_event_type("custom.thing"));
    }

    #[tokio::test]
    async fn switch_model_rejects_an_invalid_model() {
        let orchestrator = test_orchestrator();
        let err = orchestrator.switch_model("s1", "nonexistent", "foo").await.unwrap_err();
        assert!(err.to_string().contains("not valid"));
    }

    #[tokio::test]
    async fn switch_environment_with_no_servers_announces_zero_servers() {
        let orchestrator = test_orchestrator();
        let mut rx = orchestrator.bus.subscribe("global");
        orchestrator.switch_environment("s1", &ax_domain::config::McpConfig::default()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "environment.switched");
        assert_eq!(event.payload["serverCount"], 0);
    }
}
