//! OpenAI-compatible provider.
//!
//! Works with OpenAI, OpenRouter, Ollama, and other APIs exposing the chat
//! completions wire format.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::provider::ChatProvider;
use crate::sse::SseEventStream;
use crate::wire::{ChatRequest, ChatResponse, ChunkStream, StreamChunk};

/// Default chat completions endpoint root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider.
pub struct OpenAiCompatible {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatible {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Build a provider from `OPENAI_API_KEY` and `OPENAI_BASE_URL`.
    ///
    /// Both values are read at call time and passed through unvalidated.
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() {
            warn!("OPENAI_API_KEY is not set; requests will be unauthenticated");
        }
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, api_key)
    }

    fn post(&self, request: &ChatRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        req.json(request)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatible {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = self.post(&request).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(response.json().await?)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream, LlmError> {
        let response = self.post(&request).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let bytes: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>> =
            Box::pin(response.bytes_stream());
        Ok(Box::pin(ChunkDecoder::new(SseEventStream::new(bytes))))
    }
}

/// Classify a non-success response, consuming its body for the message.
///
/// 429 becomes `RateLimit` with any parseable `Retry-After` seconds; every
/// other status becomes `Api` carrying the body text.
async fn status_error(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    if status == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return LlmError::RateLimit { retry_after };
    }
    let message = response.text().await.unwrap_or_default();
    LlmError::Api { status, message }
}

/// Decodes SSE events into chat completion chunks, ending at `[DONE]`.
struct ChunkDecoder<S> {
    inner: SseEventStream<S>,
    done: bool,
}

impl<S> ChunkDecoder<S> {
    fn new(inner: SseEventStream<S>) -> Self {
        Self { inner, done: false }
    }
}

impl<S> Stream for ChunkDecoder<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<StreamChunk, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => return Poll::Ready(Some(Ok(chunk))),
                        Err(e) => {
                            debug!(data, error = %e, "failed to parse stream chunk");
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn decode(body: &str) -> ChunkDecoder<impl Stream<Item = Result<Bytes, reqwest::Error>> + Unpin>
    {
        let bytes = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::copy_from_slice(
            body.as_bytes(),
        ))]);
        ChunkDecoder::new(SseEventStream::new(bytes))
    }

    #[tokio::test]
    async fn decodes_chunks_until_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        );
        let chunks: Vec<_> = decode(body).map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content(), Some("He"));
        assert_eq!(chunks[1].content(), Some("llo"));
    }

    #[tokio::test]
    async fn skips_undecodable_payloads() {
        let body = concat!(
            "data: not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
        );
        let chunks: Vec<_> = decode(body).map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), Some("ok"));
    }

    #[tokio::test]
    async fn carries_usage_chunk() {
        let body = concat!(
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,",
            "\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        );
        let chunks: Vec<_> = decode(body).map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 1);
        let usage = chunks[0].usage.unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 5);
    }
}
