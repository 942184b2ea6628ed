//! Rill - a minimal client for streaming chat completions.
//!
//! Normalizes a conversation ([`Context`]) and model selector ([`Model`])
//! into provider wire calls, and converts the provider's reply (a single
//! payload or an incremental chunk stream) into a provider-agnostic
//! event/message protocol.
//!
//! Two entry points compose over one data model: [`complete`] blocks for a
//! full assistant message; [`stream`] yields typed [`StreamEvent`]s as the
//! response arrives and defers the final message to
//! [`ChatStream::message`]. Providers implement [`ChatProvider`] and are
//! injected by the caller; [`OpenAiCompatible`] covers any endpoint
//! speaking the chat completions wire format.

pub mod chat;
pub mod error;
pub mod openai;
pub mod provider;
pub mod session;
pub mod sse;
pub mod types;
pub mod wire;

pub use chat::{complete, stream};
pub use error::LlmError;
pub use openai::OpenAiCompatible;
pub use provider::ChatProvider;
pub use session::ChatStream;
pub use types::{
    AssistantMessage, ContentBlock, Context, Cost, Message, Model, StopReason, StreamEvent,
    TextBlock, Tool, ToolCallBlock, ToolResultMessage, Usage, UserMessage,
};
