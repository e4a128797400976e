//! Anthropic Messages API adapter.
//!
//! Translates the provider-agnostic request into the Messages wire format
//! (system prompt in a top-level field, tool results as user messages with
//! `tool_result` blocks) and parses the SSE stream back into
//! [`StreamEvent`]s, assembling tool-call arguments across frames.

use serde_json::Value;

use cd_domain::config::LlmConfig;
use cd_domain::error::{Error, Result};
use cd_domain::message::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use cd_domain::stream::{EventStream, StreamEvent, Usage};

use crate::sse::{sse_event_stream, SseFrame};
use crate::traits::{ChatRequest, ModelProvider};
use crate::util::{from_reqwest, resolve_api_key};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Streaming adapter for an Anthropic-Messages-shaped endpoint.
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Build the adapter from config. The API key is read from the
    /// environment variable named in `llm.provider.api_key_env`.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.provider.api_key_env)?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.provider.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.provider.default_model.clone(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());

        // System messages go in the top-level `system` field.
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    if let Some(text) = msg.content.text() {
                        system_parts.push(text.to_string());
                    }
                }
                Role::User => api_messages.push(user_to_wire(msg)),
                Role::Assistant => api_messages.push(assistant_to_wire(msg)),
                // Tool results travel as user messages with tool_result blocks.
                Role::Tool => api_messages.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        body
    }
}

// ── Request serialization ──────────────────────────────────────────

fn user_to_wire(msg: &Message) -> Value {
    let text = msg.content.text().unwrap_or_default();
    serde_json::json!({ "role": "user", "content": text })
}

fn assistant_to_wire(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => {
                    Some(serde_json::json!({"type": "text", "text": text}))
                }
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                })),
                ContentPart::ToolResult { .. } => None,
            })
            .collect(),
    };
    serde_json::json!({ "role": "assistant", "content": content })
}

fn tool_result_to_wire(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, content, is_error } => {
                    Some(serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content,
                        "is_error": is_error,
                    }))
                }
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    };
    serde_json::json!({ "role": "user", "content": content })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ── Stream parsing ─────────────────────────────────────────────────

/// Assembly state carried across SSE frames.
struct StreamState {
    /// Tool calls under assembly: block index -> (call_id, name, args buffer).
    open_tool_calls: std::collections::HashMap<u64, (String, String, String)>,
    /// Usage seeded from message_start, completed by message_delta.
    usage: Option<Usage>,
    done_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            open_tool_calls: std::collections::HashMap::new(),
            usage: None,
            done_emitted: false,
        }
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()?;
    let output = v.get("output_tokens")?.as_u64()?;
    Some(Usage::new(input, output))
}

fn map_stop_reason(raw: &str) -> String {
    match raw {
        "end_turn" => "stop".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

/// Parse one SSE frame into zero or more stream events.
fn parse_frame(frame: &SseFrame, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    // Heartbeats carry no payload worth parsing.
    if frame.event.as_deref() == Some("ping") {
        return Vec::new();
    }

    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    match v.get("type").and_then(Value::as_str).unwrap_or("") {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_usage);
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let call_id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: call_id.clone(),
                        tool_name: name.clone(),
                    }));
                    state.open_tool_calls.insert(idx, (call_id, name, String::new()));
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            let Some(delta) = v.get("delta") else {
                return events;
            };
            match delta.get("type").and_then(Value::as_str).unwrap_or("") {
                "text_delta" => {
                    if let Some(text) = delta.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            events.push(Ok(StreamEvent::Token { text: text.to_string() }));
                        }
                    }
                }
                "input_json_delta" => {
                    if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                        if let Some((call_id, _, args)) = state.open_tool_calls.get_mut(&idx) {
                            args.push_str(partial);
                            events.push(Ok(StreamEvent::ToolCallDelta {
                                call_id: call_id.clone(),
                                delta: partial.to_string(),
                            }));
                        }
                    }
                }
                _ => {}
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some((call_id, tool_name, args)) = state.open_tool_calls.remove(&idx) {
                // An empty args buffer means a no-argument tool.
                let arguments: Value = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&args).unwrap_or(Value::Object(Default::default()))
                };
                events.push(Ok(StreamEvent::ToolCallFinished { call_id, tool_name, arguments }));
            }
        }

        "message_delta" => {
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(Value::as_u64)
            {
                if let Some(ref mut usage) = state.usage {
                    usage.output_tokens = output;
                    usage.total_tokens = usage.input_tokens + output;
                }
            }
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
                .map(map_stop_reason);
            if stop_reason.is_some() {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done { usage: state.usage, stop_reason }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    usage: state.usage,
                    stop_reason: Some("stop".into()),
                }));
            }
        }

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error")
                .to_string();
            events.push(Ok(StreamEvent::Error { message }));
        }

        _ => {}
    }

    events
}

// ── Trait implementation ───────────────────────────────────────────

#[async_trait::async_trait]
impl ModelProvider for AnthropicProvider {
    async fn stream_chat(&self, req: &ChatRequest) -> Result<EventStream> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req);

        tracing::debug!(url = %url, model = body["model"].as_str().unwrap_or(""), "opening provider stream");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: "anthropic".into(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let mut state = StreamState::new();
        Ok(sse_event_stream(resp, move |frame| parse_frame(frame, &mut state)))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> SseFrame {
        SseFrame { event: None, data: data.to_string() }
    }

    #[test]
    fn text_delta_becomes_token() {
        let mut state = StreamState::new();
        let events = parse_frame(
            &frame(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#),
            &mut state,
        );
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::Token { text } => assert_eq!(text, "Hi"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_call_assembles_across_frames() {
        let mut state = StreamState::new();

        let started = parse_frame(
            &frame(r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"job.lookup"}}"#),
            &mut state,
        );
        assert!(matches!(
            started[0].as_ref().unwrap(),
            StreamEvent::ToolCallStarted { call_id, tool_name }
                if call_id == "toolu_1" && tool_name == "job.lookup"
        ));

        parse_frame(
            &frame(r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"job_id\":"}}"#),
            &mut state,
        );
        parse_frame(
            &frame(r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"J-100\"}"}}"#),
            &mut state,
        );

        let finished = parse_frame(
            &frame(r#"{"type":"content_block_stop","index":1}"#),
            &mut state,
        );
        match finished[0].as_ref().unwrap() {
            StreamEvent::ToolCallFinished { call_id, arguments, .. } => {
                assert_eq!(call_id, "toolu_1");
                assert_eq!(arguments["job_id"], "J-100");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn usage_flows_from_start_and_delta() {
        let mut state = StreamState::new();
        parse_frame(
            &frame(r#"{"type":"message_start","message":{"usage":{"input_tokens":120,"output_tokens":1}}}"#),
            &mut state,
        );
        let events = parse_frame(
            &frame(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":48}}"#),
            &mut state,
        );
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { usage: Some(usage), stop_reason } => {
                assert_eq!(usage.input_tokens, 120);
                assert_eq!(usage.output_tokens, 48);
                assert_eq!(usage.total_tokens, 168);
                assert_eq!(stop_reason.as_deref(), Some("stop"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_use_stop_reason_normalized() {
        let mut state = StreamState::new();
        let events = parse_frame(
            &frame(r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":5}}"#),
            &mut state,
        );
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { stop_reason, .. } => {
                assert_eq!(stop_reason.as_deref(), Some("tool_calls"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn message_stop_without_delta_still_ends() {
        let mut state = StreamState::new();
        let events = parse_frame(&frame(r#"{"type":"message_stop"}"#), &mut state);
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Done { .. }));
        // A second stop is not re-emitted.
        let again = parse_frame(&frame(r#"{"type":"message_stop"}"#), &mut state);
        assert!(again.is_empty());
    }

    #[test]
    fn ping_frames_ignored() {
        let mut state = StreamState::new();
        let events = parse_frame(
            &SseFrame { event: Some("ping".into()), data: "{\"type\":\"ping\"}".into() },
            &mut state,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn provider_error_surfaces_as_error_event() {
        let mut state = StreamState::new();
        let events = parse_frame(
            &frame(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            &mut state,
        );
        match events[0].as_ref().unwrap() {
            StreamEvent::Error { message } => assert_eq!(message, "Overloaded"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn system_messages_lift_into_system_field() {
        let req = ChatRequest {
            messages: vec![
                Message::system("You are the Crewdesk assistant."),
                Message::user("Who is on site today?"),
            ],
            ..Default::default()
        };
        let provider = AnthropicProvider {
            base_url: "https://api.anthropic.com".into(),
            api_key: "test".into(),
            default_model: "claude-sonnet-4-20250514".into(),
            client: reqwest::Client::new(),
        };
        let body = provider.build_body(&req);
        assert_eq!(body["system"], "You are the Crewdesk assistant.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn tool_results_ride_as_user_messages() {
        let msg = Message::tool_result("toolu_1", "{\"status\":\"scheduled\"}", false);
        let wire = tool_result_to_wire(&msg);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "toolu_1");
    }
}
