//! The REST surface (§6): session CRUD, prompt submission, interrupt, and
//! the SSE event stream.

pub mod events;
pub mod sessions;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::orchestrator::Orchestrator;

pub fn router() -> Router<Arc<Orchestrator>> {
    Router::new()
        .route("/sessions", get(sessions::list_sessions).post(sessions::create_session))
        .route("/sessions/:id", get(sessions::get_session).delete(sessions::delete_session))
        .route("/sessions/:id/messages", get(sessions::get_messages))
        .route("/sessions/:id/prompt", post(sessions::submit_prompt))
        .route("/sessions/:id/interrupt", post(sessions::interrupt_session))
        .route("/events", get(events::stream_events))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
