//! The provider wire-call seam.

use async_trait::async_trait;

use crate::error::LlmError;
use crate::wire::{ChatRequest, ChatResponse, ChunkStream};

/// A chat completion backend.
///
/// Implementations own the transport; callers inject them into
/// [`complete`](crate::complete) and [`stream`](crate::stream) rather than
/// having this crate construct one internally.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Make a non-streaming chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Make a streaming request, returning the raw chunk stream.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream, LlmError>;
}
