//! SSE Stream Plane (§4.7).
//!
//! One subscriber per connection: `server.connected` fires immediately on
//! open, each bus event becomes a `data: <json>\n\n` frame, and a
//! `server.heartbeat` frame fires every [`ServerConfig::sse_heartbeat_secs`]
//! of inactivity so intermediary proxies don't time the connection out.
//! Grounded on the teacher's `run_events_sse`/`make_run_event_stream`
//! (`crates/gateway/src/api/runs.rs`), generalized from a per-run
//! `broadcast::Receiver` to the bus's per-scope `mpsc::Receiver`.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use futures_core::Stream;

use ax_domain::event::Event;

use crate::orchestrator::Orchestrator;

/// Build the SSE response for one subscriber. `scope` is `"global"` or a
/// session id, matching [`crate::bus::EventBus::subscribe`].
pub fn stream_for(orch: &Orchestrator, scope: &str) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let heartbeat_secs = orch.config.server.sse_heartbeat_secs;
    let mut rx = orch.bus.subscribe(scope);
    let session_id = if scope == "global" { None } else { Some(scope.to_string()) };

    let stream = async_stream::stream! {
        let connected = serde_json::json!({
            "type": "server.connected",
            "timestamp": Utc::now(),
            "sessionId": session_id,
        });
        yield Ok(SseEvent::default().event("server.connected").data(connected.to_string()));

        let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately; discard it

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            let envelope = flatten_event(&event);
                            yield Ok(SseEvent::default().event(event.event_type.clone()).data(envelope.to_string()));
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    let heartbeat = serde_json::json!({"type": "server.heartbeat", "timestamp": Utc::now()});
                    yield Ok(SseEvent::default().event("server.heartbeat").data(heartbeat.to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Flatten an internal [`Event`] into the wire envelope (§6): `{type,
/// ...payload_fields}`, with `sessionId` spliced in alongside whatever the
/// payload itself carries.
fn flatten_event(event: &Event) -> serde_json::Value {
    let mut envelope = match &event.payload {
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        _ => serde_json::json!({}),
    };
    envelope["type"] = serde_json::json!(event.event_type);
    if envelope.get("sessionId").is_none() {
        envelope["sessionId"] = serde_json::json!(event.session_id);
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_event_spreads_payload_and_sets_type() {
        let event = Event::new("stream.text", serde_json::json!({"messageId": "m1", "content": "hi", "delta": "hi"}))
            .with_session("s1");
        let flat = flatten_event(&event);
        assert_eq!(flat["type"], "stream.text");
        assert_eq!(flat["sessionId"], "s1");
        assert_eq!(flat["messageId"], "m1");
        assert_eq!(flat["content"], "hi");
        // The internal envelope fields must not leak into the wire shape.
        assert!(flat.get("id").is_none());
        assert!(flat.get("payload").is_none());
    }

    #[test]
    fn flatten_event_without_session_has_null_session_id() {
        let event = Event::new("server.heartbeat", serde_json::json!({}));
        let flat = flatten_event(&event);
        assert!(flat["sessionId"].is_null());
    }
}
