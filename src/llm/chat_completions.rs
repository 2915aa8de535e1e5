//! OpenAI Chat Completions channel.
//!
//! Each [`ChatCompletionsChannel`] keeps the full message history, starting
//! with the system instruction, and replays it on every request. Responses
//! are streamed as server-sent events and assembled into a [`ModelReply`].

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{
    ChannelInput, LlmSettings, Message, MessageRole, ModelChannel, ModelConnector, ModelReply,
    SessionInstruction,
};
use crate::tools::{ToolCall, ToolResult};

/// Opens [`ChatCompletionsChannel`]s that share one HTTP client.
#[derive(Clone)]
pub struct ChatCompletionsConnector {
    http: reqwest::Client,
    settings: Arc<LlmSettings>,
}

impl std::fmt::Debug for ChatCompletionsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsConnector")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsConnector {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings: Arc::new(settings),
        }
    }
}

#[async_trait::async_trait]
impl ModelConnector for ChatCompletionsConnector {
    async fn open(&self, instruction: SessionInstruction) -> anyhow::Result<Arc<dyn ModelChannel>> {
        debug!(
            model = %self.settings.model,
            tools = instruction.tools.len(),
            instruction_chars = instruction.system_instruction.len(),
            "Opening chat completions channel"
        );
        Ok(Arc::new(ChatCompletionsChannel {
            http: self.http.clone(),
            settings: Arc::clone(&self.settings),
            tools: instruction.tools,
            state: Mutex::new(History::new(instruction.system_instruction)),
        }))
    }
}

/// Model-side history plus tool responses waiting for the next request.
#[derive(Debug)]
struct History {
    messages: Vec<Message>,
    buffered: Vec<Message>,
}

impl History {
    fn new(system_instruction: String) -> Self {
        Self {
            messages: vec![Message::system(system_instruction)],
            buffered: Vec::new(),
        }
    }

    fn flush_buffered(&mut self) {
        self.messages.append(&mut self.buffered);
    }

    /// Answer tool calls from the last assistant message that never got a
    /// response, so the history stays acceptable to the API.
    fn close_unanswered_calls(&mut self) {
        let Some(position) = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant)
        else {
            return;
        };
        let Some(calls) = self.messages[position].tool_calls.clone() else {
            return;
        };
        for call in calls {
            let answered = self.messages[position..]
                .iter()
                .any(|m| m.tool_call_id.as_deref() == Some(call.id.as_str()));
            if !answered {
                let result = ToolResult::failure("Tool call was not executed");
                self.messages.push(Message::tool(call.id, result.to_content()));
            }
        }
    }
}

/// A Chat Completions conversation with a fixed instruction and tool list.
pub struct ChatCompletionsChannel {
    http: reqwest::Client,
    settings: Arc<LlmSettings>,
    tools: Vec<Value>,
    state: Mutex<History>,
}

impl std::fmt::Debug for ChatCompletionsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsChannel")
            .field("model", &self.settings.model)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ModelChannel for ChatCompletionsChannel {
    async fn send(&self, input: ChannelInput) -> anyhow::Result<ModelReply> {
        let mut history = self.state.lock().await;
        match input {
            ChannelInput::ToolResponse {
                call_id, result, ..
            } => {
                history
                    .buffered
                    .push(Message::tool(call_id, result.to_content()));
                return Ok(ModelReply::default());
            }
            ChannelInput::User { text } => {
                history.flush_buffered();
                history.close_unanswered_calls();
                history.messages.push(Message::user(text));
            }
            ChannelInput::Continue => {
                history.flush_buffered();
                history.close_unanswered_calls();
            }
        }

        let reply = self.complete(&history.messages).await?;
        history.messages.push(Message::assistant(&reply));
        Ok(reply)
    }
}

impl ChatCompletionsChannel {
    fn request_body(&self, messages: &[Message]) -> Value {
        let mut body = json!({
            "stream": true,
            "messages": messages,
        });
        if self.settings.provider.sends_model_in_body() {
            body["model"] = json!(self.settings.model);
        }
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(self.tools.clone());
        }
        if let Some(temperature) = self.settings.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn complete(&self, messages: &[Message]) -> anyhow::Result<ModelReply> {
        let url = self.settings.provider.build_chat_url(&self.settings.base_url);
        let request = self.http.post(&url).json(&self.request_body(messages));
        let request = self
            .settings
            .provider
            .authorize(request, self.settings.api_key.as_deref());

        debug!(url = %url, messages = messages.len(), "Chat completions request");
        let response = request.send().await?.error_for_status()?;
        assemble_reply(sse_events(response.bytes_stream())).await
    }
}

/// One decoded piece of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEvent {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    Done,
}

/// Decode an SSE byte stream into [`StreamEvent`]s.
pub(crate) fn sse_events<S, B, E>(bytes: S) -> impl Stream<Item = anyhow::Result<StreamEvent>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
{
    async_stream::try_stream! {
        let mut buf = Vec::<u8>::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Into::<anyhow::Error>::into)?;
            buf.extend_from_slice(chunk.as_ref());

            while let Some(pos) = find_frame_end(&buf) {
                let frame = buf.drain(..pos).collect::<Vec<_>>();
                for event in parse_frame(&String::from_utf8_lossy(&frame))? {
                    yield event;
                }
            }
        }
        if !buf.is_empty() {
            for event in parse_frame(&String::from_utf8_lossy(&buf))? {
                yield event;
            }
        }
    }
}

/// End (exclusive) of the first complete frame, including its blank line.
fn find_frame_end(buf: &[u8]) -> Option<usize> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn parse_frame(frame: &str) -> anyhow::Result<Vec<StreamEvent>> {
    let mut events = Vec::new();
    for line in frame.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            events.push(StreamEvent::Done);
            continue;
        }

        let value: Value = serde_json::from_str(data)?;
        if let Some(message) = value["error"]["message"].as_str() {
            anyhow::bail!("model stream error: {message}");
        }
        let delta = &value["choices"][0]["delta"];

        if let Some(text) = delta["content"].as_str().filter(|s| !s.is_empty()) {
            events.push(StreamEvent::TextDelta(text.to_string()));
        }
        if let Some(text) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
            events.push(StreamEvent::ReasoningDelta(text.to_string()));
        }
        for call in delta["tool_calls"].as_array().into_iter().flatten() {
            let index = call["index"]
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .unwrap_or(0);
            events.push(StreamEvent::ToolCallDelta {
                index,
                id: call["id"].as_str().map(ToString::to_string),
                name: call["function"]["name"].as_str().map(ToString::to_string),
                arguments: call["function"]["arguments"]
                    .as_str()
                    .map(ToString::to_string),
            });
        }
    }
    Ok(events)
}

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default)]
struct ToolAccum {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

impl ToolAccum {
    fn into_call(self, index: usize) -> ToolCall {
        let arguments = if self.args.trim().is_empty() {
            Value::Null
        } else {
            // Malformed JSON is kept as a string so validation reports it.
            serde_json::from_str(&self.args).unwrap_or(Value::String(self.args))
        };
        ToolCall {
            id: self.id.unwrap_or_else(|| format!("call_{index}")),
            name: self.name.unwrap_or_default(),
            arguments,
        }
    }
}

/// Fold a decoded stream into a single reply.
pub(crate) async fn assemble_reply<S>(events: S) -> anyhow::Result<ModelReply>
where
    S: Stream<Item = anyhow::Result<StreamEvent>>,
{
    futures::pin_mut!(events);
    let mut text = String::new();
    let mut thinking = String::new();
    let mut tools: BTreeMap<usize, ToolAccum> = BTreeMap::new();

    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::TextDelta(delta) => text.push_str(&delta),
            StreamEvent::ReasoningDelta(delta) => thinking.push_str(&delta),
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let entry = tools.entry(index).or_default();
                if entry.id.is_none() {
                    entry.id = id;
                }
                if entry.name.is_none() {
                    entry.name = name;
                }
                if let Some(arguments) = arguments {
                    entry.args.push_str(&arguments);
                }
            }
            StreamEvent::Done => break,
        }
    }

    let tool_calls = tools
        .into_iter()
        .map(|(index, accum)| accum.into_call(index))
        .collect::<Vec<_>>();
    trace!(
        text_chars = text.len(),
        tool_calls = tool_calls.len(),
        "Assembled model reply"
    );
    Ok(ModelReply {
        text,
        thinking: (!thinking.is_empty()).then_some(thinking),
        tool_calls,
    })
}
