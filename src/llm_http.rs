//! OpenAI-compatible streaming generator.
//!
//! [`HttpGenerator`] speaks the `/chat/completions` SSE protocol and
//! normalizes its delta frames into [`GenerationChunk`]s. Two wire
//! details matter here: `reasoning_content` deltas (emitted by
//! reasoning-capable serving stacks) become
//! [`GenerationChunk::Reasoning`], and tool-call argument fragments are
//! accumulated until the finish frame so callers only ever see whole
//! calls.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{AgentError, Result};
use crate::llm::{
    ChatMessage, FinishReason, GenerationChunk, GenerationRequest, GenerationStream,
    TextGenerator, ToolCallRequest, ToolDefinition,
};

/// Streaming text generator backed by an OpenAI-compatible HTTP API.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl std::fmt::Debug for HttpGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpGenerator {
    /// Build a generator from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AgentError::Llm(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages_to_wire(&request.messages),
            "stream": true,
            "temperature": request.temperature.unwrap_or(self.temperature),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
        });
        if !request.tools.is_empty()
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("tools".into(), tools_to_wire(&request.tools));
        }
        body
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);
        debug!(
            model = request.model.as_deref().unwrap_or(&self.model),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting generation"
        );

        let mut http_request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text));
        }

        Ok(Box::pin(chunk_stream(response.bytes_stream())))
    }
}

// ── Wire encoding ─────────────────────────────────────────────

fn messages_to_wire(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages.iter().map(message_to_wire).collect()
}

fn message_to_wire(message: &ChatMessage) -> serde_json::Value {
    let mut wire = serde_json::json!({
        "role": message.role.to_string(),
        "content": message.content,
    });
    if let Some(obj) = wire.as_object_mut() {
        if !message.tool_calls.is_empty() {
            let calls: Vec<serde_json::Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    serde_json::json!({
                        "id": call.call_id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments,
                        },
                    })
                })
                .collect();
            obj.insert("tool_calls".into(), serde_json::Value::from(calls));
        }
        if let Some(id) = &message.tool_call_id {
            obj.insert("tool_call_id".into(), serde_json::Value::from(id.as_str()));
        }
    }
    wire
}

fn tools_to_wire(tools: &[ToolDefinition]) -> serde_json::Value {
    let wire: Vec<serde_json::Value> = tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                },
            })
        })
        .collect();
    serde_json::Value::from(wire)
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> AgentError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => AgentError::Llm(format!("generation auth failed: {message}")),
        429 => AgentError::Llm(format!("generation rate limited: {message}")),
        code => AgentError::Llm(format!("generation HTTP {code}: {message}")),
    }
}

/// Pull the human-readable message out of an API error body, falling back
/// to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

// ── Stream decoding ───────────────────────────────────────────

/// Splits a byte stream into SSE `data:` payloads.
///
/// The chat completions stream only ever uses `data:` frames, so none of
/// the wider SSE machinery (event types, ids, multi-line data) lives
/// here. Lines without the prefix are dropped.
#[derive(Debug, Default)]
struct DataLineBuffer {
    pending: String,
}

impl DataLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let raw: String = self.pending.drain(..=pos).collect();
            if let Some(payload) = data_payload(raw.trim_end_matches(['\n', '\r']))
                && !payload.is_empty()
            {
                payloads.push(payload.to_owned());
            }
        }
        payloads
    }

    /// Hand back a trailing payload that arrived without a final newline.
    fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        data_payload(raw.trim_end_matches('\r'))
            .filter(|payload| !payload.is_empty())
            .map(str::to_owned)
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Accumulates streamed tool-call fragments until the finish frame, at
/// which point whole calls are surfaced in index order.
#[derive(Debug, Default)]
struct PendingToolCalls {
    calls: BTreeMap<u64, ToolCallRequest>,
}

impl PendingToolCalls {
    fn absorb(&mut self, fragment: &serde_json::Value) {
        let index = fragment.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
        let entry = self.calls.entry(index).or_insert_with(|| ToolCallRequest {
            call_id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        if let Some(id) = fragment.get("id").and_then(|i| i.as_str())
            && !id.is_empty()
        {
            entry.call_id = id.to_owned();
        }
        let function = fragment.get("function");
        if let Some(name) = function.and_then(|f| f.get("name")).and_then(|n| n.as_str())
            && !name.is_empty()
        {
            entry.name = name.to_owned();
        }
        if let Some(args) = function
            .and_then(|f| f.get("arguments"))
            .and_then(|a| a.as_str())
        {
            entry.arguments.push_str(args);
        }
    }

    fn drain(&mut self) -> Vec<ToolCallRequest> {
        let calls = std::mem::take(&mut self.calls);
        calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .collect()
    }
}

/// Parse one `data:` payload into normalized chunks.
///
/// Frames that fail to parse as JSON are skipped; providers occasionally
/// interleave keep-alive noise.
fn parse_delta_frame(payload: &str, pending: &mut PendingToolCalls) -> Vec<GenerationChunk> {
    let frame: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };

    let mut chunks = Vec::new();
    let Some(choices) = frame.get("choices").and_then(|c| c.as_array()) else {
        return chunks;
    };
    for choice in choices {
        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(|c| c.as_str())
                && !text.is_empty()
            {
                chunks.push(GenerationChunk::Text {
                    delta: text.to_owned(),
                });
            }
            if let Some(text) = delta.get("reasoning_content").and_then(|c| c.as_str())
                && !text.is_empty()
            {
                chunks.push(GenerationChunk::Reasoning {
                    delta: text.to_owned(),
                });
            }
            if let Some(calls) = delta.get("tool_calls").and_then(|c| c.as_array()) {
                for call in calls {
                    pending.absorb(call);
                }
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            chunks.extend(pending.drain().into_iter().map(GenerationChunk::ToolCall));
            chunks.push(GenerationChunk::Done {
                reason: map_finish_reason(reason),
            });
        }
    }
    chunks
}

/// Convert the response byte stream into a chunk stream.
///
/// Guarantees the chunk contract: the stream ends with exactly one `Done`
/// or `Error`, even when the connection closes without a finish frame.
fn chunk_stream(
    bytes: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = GenerationChunk> + Send {
    async_stream::stream! {
        let mut bytes = std::pin::pin!(bytes);
        let mut lines = DataLineBuffer::default();
        let mut pending = PendingToolCalls::default();
        let mut finished = false;

        while let Some(next) = bytes.next().await {
            match next {
                Ok(chunk) => {
                    for payload in lines.push(&chunk) {
                        if payload.trim() == "[DONE]" {
                            continue;
                        }
                        for parsed in parse_delta_frame(&payload, &mut pending) {
                            if matches!(parsed, GenerationChunk::Done { .. }) {
                                finished = true;
                            }
                            yield parsed;
                        }
                    }
                }
                Err(e) => {
                    yield GenerationChunk::Error {
                        message: format!("stream read failed: {e}"),
                    };
                    return;
                }
            }
        }

        if let Some(payload) = lines.take_remainder()
            && payload.trim() != "[DONE]"
        {
            for parsed in parse_delta_frame(&payload, &mut pending) {
                if matches!(parsed, GenerationChunk::Done { .. }) {
                    finished = true;
                }
                yield parsed;
            }
        }

        if !finished {
            yield GenerationChunk::Done {
                reason: FinishReason::Other,
            };
        }
    }
}
