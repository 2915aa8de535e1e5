//! Language-model boundary.
//!
//! The assistant talks to the model through a [`ModelChannel`]: a stateful
//! exchange opened by a [`ModelConnector`] with a fixed system instruction
//! and tool list. The channel owns the model-side history; callers only
//! push [`ChannelInput`]s and read [`ModelReply`]s.
//!
//! - [`ChatCompletionsConnector`]: OpenAI-compatible `/v1/chat/completions`
//!   streaming driver
//! - [`Provider`]: per-vendor URL and auth differences

pub mod chat_completions;
pub mod provider;

pub use chat_completions::{ChatCompletionsChannel, ChatCompletionsConnector};
pub use provider::Provider;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tools::{ToolCall, ToolResult};

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the API (e.g., `https://api.openai.com`).
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o-mini`).
    pub model: String,
    /// Detected from `base_url` unless configured.
    pub provider: Provider,
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Everything a channel is opened with.
#[derive(Debug, Clone, Default)]
pub struct SessionInstruction {
    pub system_instruction: String,
    /// Tool declarations in function-calling JSON.
    pub tools: Vec<serde_json::Value>,
}

/// One thing sent into a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelInput {
    /// A user message; the model answers it.
    User { text: String },
    /// The result of one tool call the model asked for. Channels may buffer
    /// these until the next [`ChannelInput::Continue`].
    ToolResponse {
        call_id: String,
        name: String,
        result: ToolResult,
    },
    /// Ask for the model's follow-up after tool responses.
    Continue,
}

impl ChannelInput {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::ToolResponse { .. } => "tool_response",
            Self::Continue => "continue",
        }
    }
}

/// What the model said back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    /// Reasoning text, when the provider streams it.
    pub thinking: Option<String>,
    /// Tool calls in the order the model emitted them.
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A live exchange with the model.
#[async_trait::async_trait]
pub trait ModelChannel: Send + Sync + std::fmt::Debug {
    async fn send(&self, input: ChannelInput) -> anyhow::Result<ModelReply>;
}

/// Opens channels.
#[async_trait::async_trait]
pub trait ModelConnector: Send + Sync + std::fmt::Debug {
    async fn open(&self, instruction: SessionInstruction) -> anyhow::Result<Arc<dyn ModelChannel>>;
}

/// A message in the wire history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    #[must_use]
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }

    /// Assistant message echoing a reply back into history.
    #[must_use]
    pub fn assistant(reply: &ModelReply) -> Self {
        let tool_calls = reply
            .tool_calls
            .iter()
            .map(WireToolCall::from)
            .collect::<Vec<_>>();
        Self {
            role: MessageRole::Assistant,
            content: (!reply.text.is_empty() || tool_calls.is_empty())
                .then(|| reply.text.clone()),
            tool_call_id: None,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        }
    }

    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call as it appears in assistant messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        let arguments = match &call.arguments {
            serde_json::Value::Null => "{}".to_string(),
            serde_json::Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        Self {
            id: call.id.clone(),
            call_type: "function".to_string(),
            function: WireFunction {
                name: call.name.clone(),
                arguments,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_message_with_tool_calls_omits_empty_content() {
        let reply = ModelReply {
            text: String::new(),
            thinking: None,
            tool_calls: vec![ToolCall::new("call_1", "listJobs", json!({ "limit": 3 }))],
        };
        let value = serde_json::to_value(Message::assistant(&reply)).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value.get("content").is_none());
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], r#"{"limit":3}"#);
    }

    #[test]
    fn settings_debug_redacts_key() {
        let settings = LlmSettings {
            base_url: "https://api.openai.com".to_string(),
            api_key: Some("sk-secret".to_string()),
            model: "gpt-4o-mini".to_string(),
            provider: Provider::OpenAI,
            temperature: None,
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
