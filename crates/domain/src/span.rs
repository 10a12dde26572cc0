use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `{trace_id, span_id, parent_span_id?, name, kind, status, start_time,
/// end_time?, attributes, result?, error?}` (§3 DATA MODEL). A trace is the
/// tree rooted at spans with no parent in that trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Server,
    Client,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub status: SpanStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Span {
    pub fn start(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_span_id: Option<String>,
        name: impl Into<String>,
        kind: SpanKind,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id,
            name: name.into(),
            kind,
            status: SpanStatus::Unset,
            start_time: Utc::now(),
            end_time: None,
            attributes: HashMap::new(),
            result: None,
            error: None,
        }
    }

    pub fn finish_ok(&mut self, result: Option<serde_json::Value>) {
        self.status = SpanStatus::Ok;
        self.result = result;
        self.end_time = Some(Utc::now());
    }

    pub fn finish_err(&mut self, error: impl Into<String>) {
        self.status = SpanStatus::Error;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_produces_unset_unfinished_span() {
        let span = Span::start("t1", "s1", None, "turn", SpanKind::Server);
        assert_eq!(span.status, SpanStatus::Unset);
        assert!(!span.is_finished());
        assert!(span.duration_ms().is_none());
    }

    #[test]
    fn finish_ok_sets_status_and_duration() {
        let mut span = Span::start("t1", "s1", None, "turn", SpanKind::Server);
        span.finish_ok(Some(serde_json::json!({"ok": true})));
        assert_eq!(span.status, SpanStatus::Ok);
        assert!(span.is_finished());
        assert!(span.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn finish_err_records_error_message() {
        let mut span = Span::start("t1", "s2", Some("s1".into()), "tool_call", SpanKind::Internal);
        span.finish_err("boom");
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.error.as_deref(), Some("boom"));
    }
}
