//! Generation boundary for conversational replies.
//!
//! Defines the provider-neutral [`TextGenerator`] trait plus the message
//! and chunk types exchanged with it. Adapters normalize their wire
//! protocol into a [`GenerationChunk`] stream; reasoning text travels as
//! its own chunk kind so callers can divert it to a side channel instead
//! of the spoken reply.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

// ── Messages ──────────────────────────────────────────────────

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) output.
    Assistant,
    /// Tool execution result.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A completed tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned id, echoed back in the matching tool result.
    pub call_id: String,
    /// The tool name.
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    pub arguments: String,
}

/// One message of the history sent to the generator.
///
/// `content` is plain text for every role; tool messages additionally
/// carry the id of the call they answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced this message.
    pub role: Role,
    /// The message text.
    pub content: String,
    /// Tool calls made by the assistant (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Id of the tool call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a message with the given role and text.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls and optional lead-in text.
    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.unwrap_or_default(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message, correlated by call id.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

// ── Tools ─────────────────────────────────────────────────────

/// A tool the model may call, described by JSON Schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name (e.g. `"record_birth_details"`).
    pub name: String,
    /// Human-readable description of the tool's purpose.
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────

/// A single generation request.
///
/// Unset sampling fields fall back to the adapter's configured values.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Conversation history, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Tools available to the model this round.
    pub tools: Vec<ToolDefinition>,
    /// Overrides the adapter's configured model when set.
    pub model: Option<String>,
    /// Overrides the configured sampling temperature when set.
    pub temperature: Option<f64>,
    /// Overrides the configured reply token cap when set.
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a request from message history.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Attach tool definitions.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Request a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Request a specific sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Request a specific reply token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ── Chunks ────────────────────────────────────────────────────

/// Why a generation stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural completion.
    Stop,
    /// Token limit reached.
    Length,
    /// The model requested tool execution.
    ToolCalls,
    /// Provider content filter intervened.
    ContentFilter,
    /// Any other provider-specific reason.
    Other,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ToolCalls => write!(f, "tool_calls"),
            Self::ContentFilter => write!(f, "content_filter"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One normalized chunk of a generation stream.
///
/// A well-formed stream yields any number of `Text`, `Reasoning` and
/// `ToolCall` chunks and then terminates with exactly one `Done` or
/// `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationChunk {
    /// Visible reply text fragment.
    Text {
        /// The text fragment.
        delta: String,
    },
    /// Model reasoning fragment. Never part of the spoken reply.
    Reasoning {
        /// The reasoning fragment.
        delta: String,
    },
    /// A fully accumulated tool call.
    ToolCall(ToolCallRequest),
    /// The stream finished.
    Done {
        /// Why generation stopped.
        reason: FinishReason,
    },
    /// The stream failed after it started.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// A boxed stream of generation chunks.
pub type GenerationStream = Pin<Box<dyn Stream<Item = GenerationChunk> + Send>>;

// ── Generator trait ───────────────────────────────────────────

/// Boundary to the text generation backend.
///
/// The production implementation speaks an OpenAI-compatible streaming
/// API ([`HttpGenerator`](crate::llm_http::HttpGenerator)); tests
/// substitute scripted implementations.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start a generation and return its chunk stream.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be started at all;
    /// failures after streaming begins surface as
    /// [`GenerationChunk::Error`].
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream>;
}

/// Drain a stream into its concatenated visible text.
///
/// Reasoning and tool chunks are discarded. A mid-stream error chunk is
/// promoted to an `Err`.
pub async fn collect_text(mut stream: GenerationStream) -> Result<String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            GenerationChunk::Text { delta } => text.push_str(&delta),
            GenerationChunk::Error { message } => return Err(AgentError::Llm(message)),
            _ => {}
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn scripted(chunks: Vec<GenerationChunk>) -> GenerationStream {
        Box::pin(futures_util::stream::iter(chunks))
    }

    // ── Roles and messages ────────────────────────────────────

    #[test]
    fn role_display_matches_wire_names() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn role_serde_round_trip() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            let json = serde_json::to_string(&role).unwrap();
            let parsed: Role = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("a").role, Role::System);
        assert_eq!(ChatMessage::user("b").role, Role::User);
        assert_eq!(ChatMessage::assistant("c").role, Role::Assistant);
        let result = ChatMessage::tool_result("call_1", "done");
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn assistant_tool_calls_defaults_empty_text() {
        let calls = vec![ToolCallRequest {
            call_id: "call_9".into(),
            name: "record_birth_details".into(),
            arguments: r#"{"date":"1990-03-15"}"#.into(),
        }];
        let message = ChatMessage::assistant_tool_calls(None, calls);
        assert_eq!(message.role, Role::Assistant);
        assert!(message.content.is_empty());
        assert_eq!(message.tool_calls.len(), 1);
    }

    #[test]
    fn plain_message_serializes_without_tool_fields() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    // ── Requests ──────────────────────────────────────────────

    #[test]
    fn request_builder_chains() {
        let request = GenerationRequest::from_messages(vec![ChatMessage::user("hi")])
            .with_tools(vec![ToolDefinition::new(
                "update_profile_focus",
                "Switch the conversation focus",
                serde_json::json!({"type": "object"}),
            )])
            .with_model("bigger")
            .with_temperature(0.2)
            .with_max_tokens(256);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.model.as_deref(), Some("bigger"));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(256));
    }

    #[test]
    fn request_defaults_leave_overrides_unset() {
        let request = GenerationRequest::from_messages(Vec::new());
        assert!(request.model.is_none());
        assert!(request.temperature.is_none());
        assert!(request.max_tokens.is_none());
        assert!(request.tools.is_empty());
    }

    // ── Finish reasons ────────────────────────────────────────

    #[test]
    fn finish_reason_serde_snake_case() {
        let json = serde_json::to_string(&FinishReason::ToolCalls).unwrap();
        assert_eq!(json, "\"tool_calls\"");
        let parsed: FinishReason = serde_json::from_str("\"content_filter\"").unwrap();
        assert_eq!(parsed, FinishReason::ContentFilter);
    }

    #[test]
    fn finish_reason_display() {
        assert_eq!(FinishReason::Stop.to_string(), "stop");
        assert_eq!(FinishReason::Length.to_string(), "length");
        assert_eq!(FinishReason::Other.to_string(), "other");
    }

    // ── collect_text ──────────────────────────────────────────

    #[tokio::test]
    async fn collect_text_concatenates_visible_deltas() {
        let stream = scripted(vec![
            GenerationChunk::Reasoning {
                delta: "weighing the question".into(),
            },
            GenerationChunk::Text { delta: "Hello".into() },
            GenerationChunk::Text { delta: ", there".into() },
            GenerationChunk::Done {
                reason: FinishReason::Stop,
            },
        ]);
        let text = collect_text(stream).await.unwrap();
        assert_eq!(text, "Hello, there");
    }

    #[tokio::test]
    async fn collect_text_promotes_stream_error() {
        let stream = scripted(vec![
            GenerationChunk::Text { delta: "par".into() },
            GenerationChunk::Error {
                message: "connection reset".into(),
            },
        ]);
        let result = collect_text(stream).await;
        assert!(matches!(result, Err(AgentError::Llm(message)) if message.contains("reset")));
    }

    #[tokio::test]
    async fn collect_text_empty_stream_yields_empty_string() {
        let text = collect_text(scripted(Vec::new())).await.unwrap();
        assert_eq!(text, "");
    }
}
