//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API including tool use, streaming, and
//! the Anthropic-specific message structure where system messages go in a
//! separate top-level `system` field.

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};
use ax_domain::capability::LlmCapabilities;
use ax_domain::config::ProviderConfig;
use ax_domain::error::{Error, Result};
use ax_domain::stream::{BoxStream, StreamEvent, Usage};
use ax_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let default_model = cfg.default_model.clone().unwrap_or_else(|| "claude-sonnet-4-20250514".into());

        let capabilities = LlmCapabilities {
            supports_tools: ax_domain::capability::ToolSupport::StrictJson,
            supports_streaming: true,
            supports_json_mode: false,
            supports_vision: true,
            context_window_tokens: Some(200_000),
            max_output_tokens: Some(8_192),
        };

        let client =
            reqwest::Client::builder().timeout(std::time::Duration::from_secs(120)).build().map_err(from_reqwest)?;

        Ok(Self { id: cfg.id.clone(), base_url: cfg.base_url.trim_end_matches('/').to_string(), api_key, default_model, capabilities, client })
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_messages_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());

        // Drop empty-content messages before transforming (§4.5 Anthropic transform).
        let messages: Vec<&Message> = crate::transform::drop_empty_content_messages(&req.messages);

        let system_messages: Vec<&&Message> = messages.iter().filter(|m| m.role == Role::System).collect();
        let non_system_count = messages.len() - system_messages.len();
        let mut non_system_seen = 0usize;

        let mut system_parts: Vec<Value> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for (i, msg) in system_messages.iter().enumerate() {
            let cacheable = i < 2;
            system_parts.push(system_block(&msg.content.extract_all_text(), cacheable));
        }

        for msg in &messages {
            if msg.role == Role::System {
                continue;
            }
            non_system_seen += 1;
            let is_last_two = non_system_seen > non_system_count.saturating_sub(2);

            let value = match msg.role {
                Role::User => user_msg_to_anthropic(msg, is_last_two),
                Role::Assistant => assistant_msg_to_anthropic(msg, is_last_two),
                Role::Tool => tool_result_to_anthropic(msg, is_last_two),
                Role::System => unreachable!(),
            };
            api_messages.push(value);
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "stream": stream,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::Array(system_parts);
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
        }

        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        let max_tokens = req.max_tokens.unwrap_or(4096);
        body["max_tokens"] = serde_json::json!(max_tokens);

        if let Some(opts) = &req.provider_options {
            if let Some(thinking) = opts.get("thinking") {
                body["thinking"] = thinking.clone();
            }
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call-id sanitization and cache-control hints (§4.5 "Anthropic transform")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rewrite a tool-call id so it contains only `[A-Za-z0-9_-]`, as required
/// by the Anthropic API. Disallowed characters are replaced with `_` rather
/// than dropped, so `"call/xy-1"` becomes `"call_xy-1"`, not `"callxy-1"`.
fn sanitize_tool_call_id(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if sanitized.chars().all(|c| c == '_') {
        "tool_call".into()
    } else {
        sanitized
    }
}

fn system_block(text: &str, cacheable: bool) -> Value {
    if cacheable {
        serde_json::json!({"type": "text", "text": text, "cache_control": {"type": "ephemeral"}})
    } else {
        serde_json::json!({"type": "text", "text": text})
    }
}

fn with_cache_control(mut block: Value, cacheable: bool) -> Value {
    if cacheable {
        if let Value::Object(ref mut map) = block {
            map.insert("cache_control".into(), serde_json::json!({"type": "ephemeral"}));
        }
    }
    block
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn user_msg_to_anthropic(msg: &Message, cacheable: bool) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![with_cache_control(serde_json::json!({"type": "text", "text": t}), cacheable)],
        MessageContent::Parts(parts) => {
            let mut blocks: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
                    ContentPart::Image { url, media_type } => {
                        let mt = media_type.as_deref().unwrap_or("image/png");
                        Some(serde_json::json!({
                            "type": "image",
                            "source": {"type": "base64", "media_type": mt, "data": url},
                        }))
                    }
                    _ => None,
                })
                .collect();
            if cacheable {
                if let Some(last) = blocks.pop() {
                    blocks.push(with_cache_control(last, true));
                }
            }
            blocks
        }
    };
    serde_json::json!({"role": "user", "content": content})
}

fn assistant_msg_to_anthropic(msg: &Message, cacheable: bool) -> Value {
    let mut blocks: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": sanitize_tool_call_id(id),
                    "name": name,
                    "input": input,
                })),
                _ => None,
            })
            .collect(),
    };
    if cacheable {
        if let Some(last) = blocks.pop() {
            blocks.push(with_cache_control(last, true));
        }
    }
    serde_json::json!({"role": "assistant", "content": blocks})
}

fn tool_result_to_anthropic(msg: &Message, cacheable: bool) -> Value {
    // Anthropic: tool results are user messages with tool_result content blocks.
    let mut blocks: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, content, is_error } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": sanitize_tool_call_id(tool_use_id),
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => {
            vec![serde_json::json!({"type": "tool_result", "tool_use_id": "", "content": t})]
        }
    };
    if cacheable {
        if let Some(last) = blocks.pop() {
            blocks.push(with_cache_control(last, true));
        }
    }
    serde_json::json!({"role": "user", "content": blocks})
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

/// Compute the Anthropic `thinking.budget_tokens` value for an "high"/"max"
/// reasoning effort (§4.5 "Provider options generator").
///
/// - `"high"`  → `min(16000, max_out/2 - 1)`
/// - `"max"`   → `min(31999, max_out - 1)`
pub fn thinking_budget(effort: &str, max_output_tokens: u32) -> Option<u32> {
    match effort {
        "high" => Some((16_000).min(max_output_tokens / 2).saturating_sub(1)),
        "max" => Some((31_999).min(max_output_tokens.saturating_sub(1))),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_anthropic_response(body: &Value) -> Result<ChatResponse> {
    let content_arr = body.get("content").and_then(|v| v.as_array()).unwrap_or(&Vec::new()).clone();

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &content_arr {
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match block_type {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t.to_string());
                }
            }
            "tool_use" => {
                let call_id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let tool_name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let arguments = block.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                tool_calls.push(ToolCall { call_id, tool_name, arguments });
            }
            _ => {}
        }
    }

    let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();

    let finish_reason = body.get("stop_reason").and_then(|v| v.as_str()).map(|s| match s {
        "end_turn" => "stop".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    });

    let usage = body.get("usage").and_then(parse_anthropic_usage);

    Ok(ChatResponse { content: text_parts.join(""), tool_calls, usage, model, finish_reason })
}

fn parse_anthropic_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens")?.as_u64()? as u32;
    Some(Usage { prompt_tokens: input, completion_tokens: output, total_tokens: input + output })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming SSE helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Internal state for assembling tool calls from streaming content blocks.
struct StreamState {
    active_tool_calls: std::collections::HashMap<u64, (String, String, String)>,
    usage: Option<Usage>,
    done_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self { active_tool_calls: std::collections::HashMap::new(), usage: None, done_emitted: false }
    }
}

/// Parse a single Anthropic SSE data payload and produce zero or more stream events.
fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_anthropic_usage);
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
                if block_type == "tool_use" {
                    let call_id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    events.push(Ok(StreamEvent::ToolCallStarted { call_id: call_id.clone(), tool_name: name.clone() }));
                    state.active_tool_calls.insert(idx, (call_id, name, String::new()));
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or("");
                match delta_type {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::Token { text: text.to_string() }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(tc) = state.active_tool_calls.get_mut(&idx) {
                                tc.2.push_str(partial);
                                events.push(Ok(StreamEvent::ToolCallDelta { call_id: tc.0.clone(), delta: partial.to_string() }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some((call_id, tool_name, args_str)) = state.active_tool_calls.remove(&idx) {
                let arguments: Value = serde_json::from_str(&args_str).unwrap_or(Value::Object(Default::default()));
                events.push(Ok(StreamEvent::ToolCallFinished { call_id, tool_name, arguments }));
            }
        }

        "message_delta" => {
            if let Some(usage_val) = v.get("usage") {
                if let Some(output) = usage_val.get("output_tokens").and_then(|v| v.as_u64()) {
                    if let Some(ref mut u) = state.usage {
                        u.completion_tokens = output as u32;
                        u.total_tokens = u.prompt_tokens + u.completion_tokens;
                    }
                }
            }
            let stop_reason = v.get("delta").and_then(|d| d.get("stop_reason")).and_then(|v| v.as_str()).map(|s| match s {
                "end_turn" => "stop".to_string(),
                "tool_use" => "tool_calls".to_string(),
                other => other.to_string(),
            });
            if stop_reason.is_some() {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done { usage: state.usage.clone(), finish_reason: stop_reason }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done { usage: state.usage.clone(), finish_reason: Some("stop".into()) }));
            }
        }

        "error" => {
            let msg = v.get("error").and_then(|e| e.get("message")).and_then(|v| v.as_str()).unwrap_or("unknown error");
            events.push(Ok(StreamEvent::Error { message: msg.to_string() }));
        }

        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(&req, false);

        tracing::debug!(provider = %self.id, url = %url, "anthropic chat request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider { provider: self.id.clone(), message: format!("HTTP {} - {}", status.as_u16(), resp_text) });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_anthropic_response(&resp_json)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(&req, true);
        let provider_id = self.id.clone();

        tracing::debug!(provider = %self.id, url = %url, "anthropic stream request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider { provider: provider_id, message: format!("HTTP {} - {}", status.as_u16(), err_text) });
        }

        let mut state = StreamState::new();
        Ok(crate::sse::sse_response_stream(resp, move |data| parse_anthropic_sse(data, &mut state)))
    }

    async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Err(Error::Provider {
            provider: self.id.clone(),
            message: "Anthropic does not provide an embeddings API; use an OpenAI-compatible or Google provider for embeddings".into(),
        })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn sdk_type(&self) -> ax_domain::model::SdkType {
        ax_domain::model::SdkType::Anthropic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_disallowed_characters_with_underscore() {
        assert_eq!(sanitize_tool_call_id("call/xy-1"), "call_xy-1");
        assert_eq!(sanitize_tool_call_id("call:abc/123"), "call_abc_123");
        assert_eq!(sanitize_tool_call_id("already-ok_1"), "already-ok_1");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_tool_call_id(":::"), "tool_call");
    }

    #[test]
    fn thinking_budget_high_caps_at_16000_or_half_max() {
        assert_eq!(thinking_budget("high", 40_000), Some(16_000 - 1));
        assert_eq!(thinking_budget("high", 10_000), Some(5_000 - 1));
    }

    #[test]
    fn thinking_budget_max_caps_at_31999() {
        assert_eq!(thinking_budget("max", 100_000), Some(31_999));
        assert_eq!(thinking_budget("max", 20_000), Some(19_999));
    }

    #[test]
    fn thinking_budget_other_effort_is_none() {
        assert_eq!(thinking_budget("low", 40_000), None);
    }

    #[test]
    fn build_messages_body_drops_empty_content_message() {
        let cfg = ProviderConfig {
            id: "anthropic".into(),
            kind: ax_domain::config::ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            auth: ax_domain::config::AuthConfig { key: Some("sk-test".into()), ..Default::default() },
            default_model: None,
            models: vec![],
        };
        let provider = AnthropicProvider::from_config(&cfg).unwrap();
        let req = ChatRequest {
            messages: vec![Message::user("hi"), Message::assistant("")],
            ..Default::default()
        };
        let body = provider.build_messages_body(&req, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
    }
}
