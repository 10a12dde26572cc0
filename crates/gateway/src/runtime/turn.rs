//! The agent loop (§2.3, §4.3): one reason-act turn over a session.
//!
//! Generalized from the teacher's `run_turn`/`run_turn_inner` (LLM stream →
//! accumulate text + tool calls → dispatch tools → loop) onto the
//! orchestrator's typed services: [`ax_sessions::SessionStore`] for
//! persistence, [`ax_tools::ControlPlane`] for tool dispatch, and the
//! [`crate::bus::EventBus`] for the `stream.*` event contract (§4.7) instead
//! of the teacher's run-store broadcast channel.

use std::sync::Arc;

use ax_domain::error::Error;
use ax_domain::event::Event;
use ax_domain::model::{ModelLimits, ModelMetadata};
use ax_domain::session::{Part, Role as SessionRole};
use ax_domain::stream::{StreamEvent, Usage};
use ax_domain::tool::{
    ContentPart, Message as WireMessage, MessageContent, Role as WireRole, ToolCall,
};
use ax_providers::{options, ChatRequest};
use ax_tools::descriptor::ExecutionContext;
use ax_tools::timeout::CancelSignal;
use futures_util::StreamExt;

use crate::orchestrator::Orchestrator;
use crate::runtime::cancel::CancelToken;

/// Hard ceiling on reason-act iterations within one turn — guards against a
/// model that never stops calling tools.
const MAX_TOOL_LOOPS: usize = 25;

pub struct TurnInput {
    pub session_id: String,
    pub user_text: String,
    pub model: Option<String>,
}

/// Run one full turn: persist the user message, stream the model's
/// response across as many tool-call rounds as it asks for, publish
/// `stream.*` events throughout, and persist the final assistant message.
///
/// Never propagates an error to the caller — all failure paths resolve to a
/// `stream.error` (or, for interrupts, a `stream.completed{interrupted:
/// true}`) event on the bus, since this runs detached in a spawned task.
pub async fn run_turn(orch: Arc<Orchestrator>, cancel: CancelToken, input: TurnInput) {
    let session_id = input.session_id.clone();

    if orch.sessions.get(&session_id).is_none() {
        orch.sessions.create_with_id(session_id.clone(), None);
    }

    if let Err(e) = orch.sessions.append_message(
        &session_id,
        SessionRole::User,
        vec![Part::Text { text: input.user_text.clone() }],
    ) {
        publish_error(&orch, &session_id, None, &e.to_string()).await;
        return;
    }

    if let Err(e) = run_loop(&orch, &cancel, &input).await {
        // The interrupt contract (§4.3) never surfaces as stream.error;
        // interrupt_turn already published stream.completed{interrupted}.
        if !matches!(e, Error::Interrupt(_)) && e.is_surfaceable() {
            publish_error(&orch, &session_id, None, &e.to_string()).await;
        }
    }
}

async fn run_loop(orch: &Arc<Orchestrator>, cancel: &CancelToken, input: &TurnInput) -> Result<(), Error> {
    let session_id = &input.session_id;
    let selection = orch.model_selection(session_id, input.model.as_deref())?;
    orch.recency.record(session_id, selection.clone());

    let provider = orch
        .llm
        .get(&selection.provider_id)
        .ok_or_else(|| Error::Config(format!("provider '{}' not found", selection.provider_id)))?;

    let tool_defs = orch.tool_definitions().await;

    let capabilities = orch.model_capabilities.get(&format!("{}/{}", selection.provider_id, selection.model)).cloned();
    let reasoning_field = capabilities.as_ref().and_then(|c| c.interleaved_reasoning.field.clone());

    let history = orch.sessions.to_history(session_id)?;
    let (mut messages, lifted_reasoning) = if reasoning_field.is_some() {
        lift_interleaved_reasoning(&history)
    } else {
        (build_wire_messages(&history), String::new())
    };

    let model_metadata = ModelMetadata {
        id: selection.model.clone(),
        capabilities: capabilities.unwrap_or_default(),
        limits: ModelLimits {
            context_window: provider.capabilities().context_window_tokens,
            max_output_tokens: provider.capabilities().max_output_tokens,
        },
        cost: None,
    };

    let mut total_usage = Usage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 };

    for loop_idx in 0..MAX_TOOL_LOOPS {
        if cancel.is_cancelled() {
            return interrupt_turn(orch, session_id, None).await;
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        publish(
            orch,
            session_id,
            Event::new("stream.start", serde_json::json!({"messageId": message_id, "model": selection.model})),
        )
        .await;

        let generated = options::generate(&model_metadata, provider.sdk_type(), Some(0.2), provider.capabilities().max_output_tokens, None);
        let provider_options = match (&reasoning_field, generated.provider_options) {
            (Some(field), existing) if !lifted_reasoning.is_empty() => {
                let mut po = existing.unwrap_or_else(|| serde_json::json!({}));
                po["openai_compatible"] = serde_json::json!({ field.clone(): lifted_reasoning.clone() });
                Some(po)
            }
            (_, existing) => existing,
        };

        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: generated.temperature,
            max_tokens: generated.max_tokens,
            json_mode: false,
            model: Some(selection.model.clone()),
            provider_options,
        };

        let stream_result = provider.chat_stream(req.clone()).await;
        let stream = match stream_result {
            Ok(s) => s,
            Err(e) if e.is_retryable() => provider.chat_stream(req).await?,
            Err(e) => {
                publish_error(orch, session_id, Some(&message_id), &e.to_string()).await;
                return Ok(());
            }
        };

        let round = match consume_stream(orch, cancel, session_id, &message_id, stream, &mut total_usage).await {
            Ok(round) => round,
            Err(e) => {
                publish_error(orch, session_id, Some(&message_id), &e.to_string()).await;
                return Ok(());
            }
        };

        if round.interrupted {
            return interrupt_turn(orch, session_id, Some(&message_id)).await;
        }

        let assistant_message = build_assistant_session_message(&round.text, &round.tool_calls);
        orch.sessions.append_message(session_id, SessionRole::Assistant, assistant_message)?;

        if round.tool_calls.is_empty() {
            publish(
                orch,
                session_id,
                Event::new(
                    "stream.completed",
                    serde_json::json!({
                        "messageId": message_id,
                        "usage": total_usage,
                        "finish_reason": round.finish_reason,
                    }),
                ),
            )
            .await;
            return Ok(());
        }

        if loop_idx == MAX_TOOL_LOOPS - 1 {
            publish(
                orch,
                session_id,
                Event::new(
                    "stream.completed",
                    serde_json::json!({
                        "messageId": message_id,
                        "usage": total_usage,
                        "finish_reason": round.finish_reason,
                        "truncated": true,
                    }),
                ),
            )
            .await;
            return Ok(());
        }

        let results = dispatch_tool_calls(orch, cancel, session_id, &round.tool_calls).await;
        let mut result_parts = Vec::new();
        for (call, outcome) in round.tool_calls.iter().zip(results.into_iter()) {
            let (content, is_error) = outcome;
            publish(
                orch,
                session_id,
                Event::new(
                    "stream.tool_result",
                    serde_json::json!({
                        "messageId": message_id,
                        "toolCallId": call.call_id,
                        "toolName": call.tool_name,
                        "result": content,
                        "success": !is_error,
                    }),
                ),
            )
            .await;
            result_parts.push(Part::ToolResult { tool_call_id: call.call_id.clone(), content: content.clone(), is_error });
        }
        orch.sessions.append_message(session_id, SessionRole::Tool, result_parts.clone())?;

        messages.push(build_assistant_wire_message(&round.text, &round.tool_calls));
        for (call, part) in round.tool_calls.iter().zip(result_parts.iter()) {
            if let Part::ToolResult { content, is_error, .. } = part {
                messages.push(WireMessage {
                    role: WireRole::Tool,
                    content: MessageContent::Parts(vec![ContentPart::ToolResult {
                        tool_use_id: call.call_id.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                    }]),
                });
            }
        }
    }

    Ok(())
}

struct StreamRound {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
    interrupted: bool,
}

async fn consume_stream(
    orch: &Arc<Orchestrator>,
    cancel: &CancelToken,
    session_id: &str,
    message_id: &str,
    mut stream: ax_domain::stream::BoxStream<'static, ax_domain::error::Result<StreamEvent>>,
    total_usage: &mut Usage,
) -> Result<StreamRound, Error> {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut pending: std::collections::HashMap<String, (String, String)> = std::collections::HashMap::new();
    let mut finish_reason = None;

    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            return Ok(StreamRound { text, tool_calls, finish_reason, interrupted: true });
        }

        match item? {
            StreamEvent::Token { text: delta } => {
                text.push_str(&delta);
                publish(
                    orch,
                    session_id,
                    Event::new("stream.text", serde_json::json!({"messageId": message_id, "content": text, "delta": delta})),
                )
                .await;
            }
            StreamEvent::Thinking { text: delta } => {
                reasoning.push_str(&delta);
                publish(
                    orch,
                    session_id,
                    Event::new("stream.reasoning", serde_json::json!({"messageId": message_id, "content": reasoning})),
                )
                .await;
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                pending.insert(call_id, (tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, args)) = pending.get_mut(&call_id) {
                    args.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                pending.remove(&call_id);
                tool_calls.push(ToolCall { call_id: call_id.clone(), tool_name: tool_name.clone(), arguments: arguments.clone() });
                publish(
                    orch,
                    session_id,
                    Event::new(
                        "stream.tool_call",
                        serde_json::json!({
                            "messageId": message_id,
                            "toolCallId": call_id,
                            "toolName": tool_name,
                            "toolArgs": arguments,
                        }),
                    ),
                )
                .await;
            }
            StreamEvent::Done { usage, finish_reason: reason } => {
                if let Some(u) = usage {
                    total_usage.prompt_tokens += u.prompt_tokens;
                    total_usage.completion_tokens += u.completion_tokens;
                    total_usage.total_tokens += u.total_tokens;
                }
                finish_reason = reason;
            }
            StreamEvent::Error { message } => return Err(Error::Provider { provider: "stream".into(), message }),
        }
    }

    Ok(StreamRound { text, tool_calls, finish_reason, interrupted: false })
}

async fn dispatch_tool_calls(
    orch: &Arc<Orchestrator>,
    cancel: &CancelToken,
    session_id: &str,
    calls: &[ToolCall],
) -> Vec<(String, bool)> {
    let futures = calls.iter().map(|call| {
        let orch = orch.clone();
        let session_id = session_id.to_string();
        let call = call.clone();
        let cancel_signal = CancelSignal::new();
        if cancel.is_cancelled() {
            cancel_signal.cancel();
        }
        async move {
            if let Some((server_id, tool_name)) = call.tool_name.strip_prefix("mcp:").and_then(|rest| rest.split_once(':')) {
                let result = orch.mcp.read().await.call_tool(server_id, tool_name, call.arguments.clone()).await;
                return match result {
                    Ok(result) => {
                        let text = result.content.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n");
                        (text, result.is_error)
                    }
                    Err(e) => (e.to_string(), true),
                };
            }
            let ctx = ExecutionContext { session_id, cancel: cancel_signal };
            match orch.tools.execute(&call.tool_name, call.arguments.clone(), ctx).await {
                Ok(v) => (v.to_string(), false),
                Err(e) => (e.to_string(), true),
            }
        }
    });
    futures_util::future::join_all(futures).await
}

async fn interrupt_turn(orch: &Arc<Orchestrator>, session_id: &str, message_id: Option<&str>) -> Result<(), Error> {
    orch.sessions.append_message(
        session_id,
        SessionRole::User,
        vec![Part::Text { text: "[Session interrupted by user]".into() }],
    )?;
    publish(
        orch,
        session_id,
        Event::new("stream.completed", serde_json::json!({"messageId": message_id, "interrupted": true})),
    )
    .await;
    Err(Error::Interrupt(session_id.to_string()))
}

async fn publish(orch: &Arc<Orchestrator>, session_id: &str, event: Event) {
    orch.bus.publish(event.with_session(session_id.to_string())).await;
}

async fn publish_error(orch: &Arc<Orchestrator>, session_id: &str, message_id: Option<&str>, message: &str) {
    publish(orch, session_id, Event::new("stream.error", serde_json::json!({"messageId": message_id, "error": message}))).await;
}

fn build_wire_messages(history: &[ax_domain::session::Message]) -> Vec<WireMessage> {
    history.iter().map(session_message_to_wire).collect()
}

fn session_message_to_wire(message: &ax_domain::session::Message) -> WireMessage {
    let role = match message.role {
        SessionRole::System => WireRole::System,
        SessionRole::User => WireRole::User,
        SessionRole::Assistant => WireRole::Assistant,
        SessionRole::Tool => WireRole::Tool,
    };

    let parts: Vec<ContentPart> = message
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::Text { text } => Some(ContentPart::Text { text: text.clone() }),
            Part::ToolCall { tool_call_id, tool_name, arguments } => {
                Some(ContentPart::ToolUse { id: tool_call_id.clone(), name: tool_name.clone(), input: arguments.clone() })
            }
            Part::ToolResult { tool_call_id, content, is_error } => {
                Some(ContentPart::ToolResult { tool_use_id: tool_call_id.clone(), content: content.clone(), is_error: *is_error })
            }
            Part::Image { url, media_type } => Some(ContentPart::Image { url: url.clone(), media_type: media_type.clone() }),
            // Reasoning / compaction-summary / audio / file parts are not
            // sent back to the provider as conversation content.
            Part::Reasoning { .. } | Part::CompactionSummary { .. } | Part::Audio { .. } | Part::File { .. } => None,
        })
        .collect();

    WireMessage { role, content: MessageContent::Parts(parts) }
}

/// Interleaved-reasoning lift (§4.3 last paragraph): convert history to wire
/// messages the same way [`session_message_to_wire`] does, except `Part::Reasoning`
/// content and `<think>...</think>`-wrapped spans inside text parts are pulled
/// out of the outgoing messages and concatenated, rather than being dropped
/// or sent through as ordinary text. The concatenation is handed back so the
/// caller can attach it to `provider_options.openai_compatible.<field>`.
fn lift_interleaved_reasoning(history: &[ax_domain::session::Message]) -> (Vec<WireMessage>, String) {
    let mut lifted = String::new();
    let mut push_lifted = |text: &str| {
        if text.is_empty() {
            return;
        }
        if !lifted.is_empty() {
            lifted.push('\n');
        }
        lifted.push_str(text);
    };

    let messages = history
        .iter()
        .map(|message| {
            let role = match message.role {
                SessionRole::System => WireRole::System,
                SessionRole::User => WireRole::User,
                SessionRole::Assistant => WireRole::Assistant,
                SessionRole::Tool => WireRole::Tool,
            };

            let parts: Vec<ContentPart> = message
                .parts
                .iter()
                .filter_map(|part| match part {
                    Part::Reasoning { text } => {
                        push_lifted(text);
                        None
                    }
                    Part::Text { text } => {
                        let (stripped, spans) = extract_think_spans(text);
                        for span in &spans {
                            push_lifted(span);
                        }
                        if stripped.is_empty() { None } else { Some(ContentPart::Text { text: stripped }) }
                    }
                    Part::ToolCall { tool_call_id, tool_name, arguments } => {
                        Some(ContentPart::ToolUse { id: tool_call_id.clone(), name: tool_name.clone(), input: arguments.clone() })
                    }
                    Part::ToolResult { tool_call_id, content, is_error } => {
                        Some(ContentPart::ToolResult { tool_use_id: tool_call_id.clone(), content: content.clone(), is_error: *is_error })
                    }
                    Part::Image { url, media_type } => Some(ContentPart::Image { url: url.clone(), media_type: media_type.clone() }),
                    Part::CompactionSummary { .. } | Part::Audio { .. } | Part::File { .. } => None,
                })
                .collect();

            WireMessage { role, content: MessageContent::Parts(parts) }
        })
        .collect();

    (messages, lifted)
}

/// Strip `<think>...</think>` spans out of `text`, returning the remaining
/// text and the extracted span contents in order. An unterminated `<think>`
/// leaves the rest of the string untouched (treated as ordinary text).
fn extract_think_spans(text: &str) -> (String, Vec<String>) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut stripped = String::new();
    let mut spans = Vec::new();
    let mut remaining = text;

    while let Some(start) = remaining.find(OPEN) {
        stripped.push_str(&remaining[..start]);
        let after_open = &remaining[start + OPEN.len()..];
        match after_open.find(CLOSE) {
            Some(end) => {
                spans.push(after_open[..end].to_string());
                remaining = &after_open[end + CLOSE.len()..];
            }
            None => {
                stripped.push_str(&remaining[start..]);
                remaining = "";
                break;
            }
        }
    }
    stripped.push_str(remaining);

    (stripped, spans)
}

fn build_assistant_session_message(text: &str, tool_calls: &[ToolCall]) -> Vec<Part> {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(Part::Text { text: text.to_string() });
    }
    for call in tool_calls {
        parts.push(Part::ToolCall { tool_call_id: call.call_id.clone(), tool_name: call.tool_name.clone(), arguments: call.arguments.clone() });
    }
    parts
}

fn build_assistant_wire_message(text: &str, tool_calls: &[ToolCall]) -> WireMessage {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.to_string() });
    }
    for call in tool_calls {
        parts.push(ContentPart::ToolUse { id: call.call_id.clone(), name: call.tool_name.clone(), input: call.arguments.clone() });
    }
    WireMessage { role: WireRole::Assistant, content: MessageContent::Parts(parts) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax_domain::session::Message as SessionMessage;

    #[test]
    fn session_message_to_wire_drops_reasoning_and_keeps_text() {
        let mut msg = SessionMessage::new(SessionRole::Assistant);
        msg.parts = vec![
            Part::Reasoning { text: "thinking".into() },
            Part::Text { text: "hello".into() },
        ];
        let wire = session_message_to_wire(&msg);
        match wire.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(&parts[0], ContentPart::Text { text } if text == "hello"));
            }
            _ => panic!("expected Parts"),
        }
    }

    #[test]
    fn build_assistant_session_message_text_and_tool_calls() {
        let calls = vec![ToolCall { call_id: "tc_1".into(), tool_name: "search".into(), arguments: serde_json::json!({}) }];
        let parts = build_assistant_session_message("thinking", &calls);
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], Part::Text { .. }));
        assert!(matches!(&parts[1], Part::ToolCall { .. }));
    }

    #[test]
    fn build_assistant_session_message_empty_text_omitted() {
        let parts = build_assistant_session_message("", &[]);
        assert!(parts.is_empty());
    }

    #[test]
    fn extract_think_spans_pulls_out_wrapped_text() {
        let (stripped, spans) = extract_think_spans("before<think>reasoning here</think>after");
        assert_eq!(stripped, "beforeafter");
        assert_eq!(spans, vec!["reasoning here".to_string()]);
    }

    #[test]
    fn extract_think_spans_no_tags_is_unchanged() {
        let (stripped, spans) = extract_think_spans("just plain text");
        assert_eq!(stripped, "just plain text");
        assert!(spans.is_empty());
    }

    #[test]
    fn lift_interleaved_reasoning_concatenates_reasoning_and_think_spans() {
        let mut msg = SessionMessage::new(SessionRole::Assistant);
        msg.parts = vec![
            Part::Reasoning { text: "step one".into() },
            Part::Text { text: "<think>step two</think>the answer".into() },
        ];
        let (messages, lifted) = lift_interleaved_reasoning(std::slice::from_ref(&msg));
        assert_eq!(lifted, "step one\nstep two");
        match &messages[0].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(&parts[0], ContentPart::Text { text } if text == "the answer"));
            }
            _ => panic!("expected Parts"),
        }
    }
}
