//! Session management endpoints (§6): create/list/inspect/delete a
//! session, read its message history, submit a prompt, and interrupt an
//! in-flight turn.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::http::StatusCode;
use serde::Deserialize;

use ax_domain::event::Event;

use crate::orchestrator::Orchestrator;

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(serde::Serialize)]
struct SessionSummary {
    id: String,
    title: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "updatedAt")]
    updated_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list_sessions(State(orch): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let mut sessions = orch.sessions.list();
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let summaries: Vec<SessionSummary> = sessions
        .into_iter()
        .map(|s| SessionSummary { id: s.id, title: s.title, created_at: s.created_at, updated_at: s.updated_at })
        .collect();
    Json(summaries)
}

pub async fn create_session(State(orch): State<Arc<Orchestrator>>, Json(body): Json<CreateSessionBody>) -> impl IntoResponse {
    let session = orch.sessions.create(body.title);
    (StatusCode::CREATED, Json(session))
}

pub async fn get_session(State(orch): State<Arc<Orchestrator>>, Path(id): Path<String>) -> impl IntoResponse {
    match orch.sessions.get(&id) {
        Some(session) => Json(session).into_response(),
        None => not_found(),
    }
}

pub async fn delete_session(State(orch): State<Arc<Orchestrator>>, Path(id): Path<String>) -> impl IntoResponse {
    if orch.sessions.delete(&id) {
        Json(serde_json::json!({"success": true})).into_response()
    } else {
        not_found()
    }
}

pub async fn get_messages(State(orch): State<Arc<Orchestrator>>, Path(id): Path<String>) -> impl IntoResponse {
    match orch.sessions.to_history(&id) {
        Ok(messages) => Json(messages).into_response(),
        Err(_) => not_found(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Publishes a `user_query` event rather than calling [`Orchestrator::handle_query`]
/// directly — all query dispatch flows through the event bus's default rule
/// table (§4.8) so that rule-driven automation sees the same traffic an API
/// caller produces.
pub async fn submit_prompt(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
    Json(body): Json<PromptBody>,
) -> impl IntoResponse {
    if orch.sessions.get(&id).is_none() {
        orch.sessions.create_with_id(id.clone(), None);
    }

    let mut payload = serde_json::json!({ "content": body.content });
    if let Some(model) = &body.model {
        payload["model"] = serde_json::json!(model);
    }

    orch.publish_event(Event::new("user_query", payload).with_session(id.clone())).await;
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "success": true,
            "sessionId": id,
            "message": "prompt queued",
        })),
    )
}

pub async fn interrupt_session(State(orch): State<Arc<Orchestrator>>, Path(id): Path<String>) -> impl IntoResponse {
    let interrupted = orch.interrupt(&id);
    Json(serde_json::json!({ "interrupted": interrupted }))
}

fn not_found() -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "session not found" }))).into_response()
}
