//! Common types for chat completions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::wire;

/// Selects a provider/model pair for a request.
///
/// No validation is performed; an invalid combination only surfaces as a
/// provider-call failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub provider: String,
    pub name: String,
}

impl Model {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
        }
    }
}

/// A tool the assistant may request to invoke.
///
/// `parameters` is an externally-defined JSON schema passed through to the
/// provider as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One unit of assistant output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text(TextBlock),
    ToolCall(ToolCallBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextBlock { text: text.into() })
    }
}

/// Plain text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: content.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

/// Assistant output, with the usage reported for producing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The outcome of a tool invocation, reported back by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<ContentBlock>,
    /// Caller-supplied; never inferred from the content.
    pub is_error: bool,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ToolResultMessage {
    /// Create a tool result stamped with the current time.
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<ContentBlock>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content,
            is_error,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Full conversation state. Owned and managed by the caller; never mutated
/// by this crate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

impl Context {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    /// Append a message to the history.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Token accounting reported by the provider.
///
/// `cost.total` carries the provider's total token count, not a priced
/// amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
    pub cost: Cost,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    pub total: u32,
}

impl From<wire::Usage> for Usage {
    fn from(usage: wire::Usage) -> Self {
        Self {
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
            cost: Cost {
                total: usage.total_tokens,
            },
            cached: usage.cached_tokens,
        }
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
}

impl StopReason {
    pub(crate) fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            Some("length") => Self::Length,
            Some("tool_calls") => Self::ToolCalls,
            _ => Self::Stop,
        }
    }
}

/// One state transition of a streaming session.
///
/// A successful session emits `Start`, `TextStart`, zero or more deltas,
/// `TextEnd`, then `Done`. A failed session ends with a single terminal
/// `Error` instead.
#[derive(Debug)]
pub enum StreamEvent {
    /// The response lifecycle has begun.
    Start { model: String },
    TextStart,
    /// Incremental text content.
    TextDelta { delta: String },
    TextEnd,
    /// A tool call at `index` began streaming.
    ToolCallStart { index: u32 },
    /// An argument fragment for the tool call at `index`.
    ToolCallDelta { index: u32, delta: String },
    /// The tool call at `index` is complete.
    ToolCallEnd { index: u32, call: ToolCallBlock },
    Done { reason: StopReason },
    /// Terminal failure; no further events follow.
    Error(LlmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_constructor() {
        let model = Model::new("openai", "gpt-4");
        assert_eq!(model.provider, "openai");
        assert_eq!(model.name, "gpt-4");
    }

    #[test]
    fn message_role_tags() {
        let user = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(user["role"], "user");
        assert_eq!(user["content"], "hi");

        let assistant = serde_json::to_value(Message::Assistant(AssistantMessage {
            content: vec![ContentBlock::text("hello")],
            usage: None,
        }))
        .unwrap();
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["content"][0]["type"], "text");
        assert_eq!(assistant["content"][0]["text"], "hello");
        assert!(assistant.get("usage").is_none());

        let result = serde_json::to_value(Message::ToolResult(ToolResultMessage::new(
            "c1",
            "search",
            vec![ContentBlock::text("ok")],
            false,
        )))
        .unwrap();
        assert_eq!(result["role"], "toolResult");
        assert_eq!(result["toolCallId"], "c1");
        assert_eq!(result["toolName"], "search");
        assert_eq!(result["isError"], false);
        assert!(result["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn tool_call_block_tag() {
        let mut arguments = Map::new();
        arguments.insert("x".to_string(), serde_json::json!(1));
        let block = serde_json::to_value(ContentBlock::ToolCall(ToolCallBlock {
            id: "c1".to_string(),
            name: "f".to_string(),
            arguments,
        }))
        .unwrap();
        assert_eq!(block["type"], "toolCall");
        assert_eq!(block["arguments"]["x"], 1);

        let parsed: ContentBlock =
            serde_json::from_value(serde_json::json!({"type": "text", "text": "t"})).unwrap();
        assert_eq!(parsed, ContentBlock::text("t"));
    }

    #[test]
    fn usage_from_wire() {
        let usage = Usage::from(wire::Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cached_tokens: Some(0),
        });
        assert_eq!(usage.input, 10);
        assert_eq!(usage.output, 5);
        assert_eq!(usage.cost.total, 15);
        assert_eq!(usage.cached, Some(0));

        let json = serde_json::to_value(Usage {
            cached: None,
            ..usage
        })
        .unwrap();
        assert!(json.get("cached").is_none());
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(StopReason::from_wire(Some("stop")), StopReason::Stop);
        assert_eq!(StopReason::from_wire(Some("length")), StopReason::Length);
        assert_eq!(
            StopReason::from_wire(Some("tool_calls")),
            StopReason::ToolCalls
        );
        assert_eq!(StopReason::from_wire(None), StopReason::Stop);
    }
}
