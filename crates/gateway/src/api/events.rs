//! GET /events — the SSE Stream Plane entry point (§4.7).

use std::sync::Arc;

use axum::extract::{Query, State};
use serde::Deserialize;

use crate::orchestrator::Orchestrator;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub async fn stream_events(State(orch): State<Arc<Orchestrator>>, Query(query): Query<EventsQuery>) -> impl axum::response::IntoResponse {
    let scope = query.session_id.unwrap_or_else(|| "global".to_string());
    crate::sse::stream_for(&orch, &scope)
}
