use serde::Serialize;

/// Structured trace events emitted across the agentx crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    SessionResolved {
        session_id: String,
        is_new: bool,
    },
    SessionReset {
        session_id: String,
        reason: String,
    },
    ToolInvoked {
        tool_name: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "agentx_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_does_not_panic_on_any_variant() {
        TraceEvent::SessionResolved { session_id: "s1".into(), is_new: true }.emit();
        TraceEvent::ToolInvoked { tool_name: "bash".into(), call_id: "tc1".into(), success: true, duration_ms: 12 }
            .emit();
    }
}
