//! Chat completion entry points.
//!
//! [`complete`] and [`stream`] normalize a [`Context`] and [`Model`] into a
//! wire request, hand it to an injected [`ChatProvider`], and translate the
//! reply back into the crate's message types.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::LlmError;
use crate::provider::ChatProvider;
use crate::session::ChatStream;
use crate::types::{
    AssistantMessage, ContentBlock, Context, Message, Model, TextBlock, Tool, ToolCallBlock, Usage,
};
use crate::wire;

/// Issue one blocking chat completion round trip.
///
/// Any failure (transport, provider error, unparseable tool-call argument
/// payload) propagates to the caller. No retry, no partial result.
pub async fn complete(
    provider: &dyn ChatProvider,
    model: &Model,
    context: &Context,
) -> Result<AssistantMessage, LlmError> {
    let request = build_request(model, context, false);
    debug!(model = %model.name, messages = request.messages.len(), "chat completion request");
    let response = provider.chat(request).await?;
    from_response(response)
}

/// Open a streaming chat completion session.
///
/// Returns immediately; the wire call is issued once the returned stream is
/// polled past its preamble events. See [`ChatStream`] for the event
/// protocol and the deferred result accessor.
pub fn stream(provider: Arc<dyn ChatProvider>, model: &Model, context: &Context) -> ChatStream {
    let request = build_request(model, context, true);
    debug!(model = %model.name, messages = request.messages.len(), "chat stream request");
    let connect = Box::pin(async move { provider.chat_stream(request).await });
    ChatStream::new(model.name.clone(), connect)
}

fn build_request(model: &Model, context: &Context, streaming: bool) -> wire::ChatRequest {
    let mut messages = Vec::with_capacity(context.messages.len() + 1);
    if !context.system_prompt.is_empty() {
        messages.push(wire::Message {
            role: wire::Role::System,
            content: Some(context.system_prompt.clone()),
            tool_calls: None,
            tool_call_id: None,
        });
    }
    messages.extend(context.messages.iter().map(flatten_message));

    wire::ChatRequest {
        model: model.name.clone(),
        messages,
        tools: context
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(to_wire_tool).collect()),
        stream: streaming.then_some(true),
        stream_options: streaming.then_some(wire::StreamOptions {
            include_usage: true,
        }),
    }
}

fn flatten_message(message: &Message) -> wire::Message {
    match message {
        Message::User(user) => wire::Message {
            role: wire::Role::User,
            content: Some(user.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant(assistant) => {
            let text = joined_text(&assistant.content);
            let calls: Vec<wire::ToolCall> = assistant
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolCall(call) => Some(to_wire_call(call)),
                    ContentBlock::Text(_) => None,
                })
                .collect();
            wire::Message {
                role: wire::Role::Assistant,
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!calls.is_empty()).then_some(calls),
                tool_call_id: None,
            }
        }
        Message::ToolResult(result) => wire::Message {
            role: wire::Role::Tool,
            content: Some(joined_text(&result.content)),
            tool_calls: None,
            tool_call_id: Some(result.tool_call_id.clone()),
        },
    }
}

/// Newline-join the text blocks of a content sequence.
fn joined_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text(text) => Some(text.text.as_str()),
            ContentBlock::ToolCall(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_wire_call(call: &ToolCallBlock) -> wire::ToolCall {
    wire::ToolCall {
        id: call.id.clone(),
        tool_type: "function".to_string(),
        function: wire::FunctionCall {
            name: call.name.clone(),
            arguments: Value::Object(call.arguments.clone()).to_string(),
        },
    }
}

fn to_wire_tool(tool: &Tool) -> wire::ToolDefinition {
    wire::ToolDefinition {
        tool_type: "function".to_string(),
        function: wire::FunctionDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

fn from_response(response: wire::ChatResponse) -> Result<AssistantMessage, LlmError> {
    let usage = response.usage.map(Usage::from);
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(LlmError::Malformed("response contained no choices".into()));
    };

    let mut content = Vec::new();
    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(ContentBlock::Text(TextBlock { text }));
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        content.push(ContentBlock::ToolCall(parse_tool_call(call)?));
    }

    Ok(AssistantMessage { content, usage })
}

fn parse_tool_call(call: wire::ToolCall) -> Result<ToolCallBlock, LlmError> {
    let arguments: Map<String, Value> = serde_json::from_str(&call.function.arguments)
        .map_err(|e| LlmError::Malformed(format!("tool call {} arguments: {e}", call.id)))?;
    Ok(ToolCallBlock {
        id: call.id,
        name: call.function.name,
        arguments,
    })
}
