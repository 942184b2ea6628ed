//! Server-sent event framing.
//!
//! Minimal incremental parser for the `data:` subset of SSE used by chat
//! completion endpoints. Frames a byte stream into events without assuming
//! line or UTF-8 boundaries align with network chunks.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use crate::error::LlmError;

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Joined `data:` payload lines.
    pub data: String,
}

/// Incrementally frames a byte stream into server-sent events.
pub struct SseEventStream<S> {
    inner: S,
    buffer: Vec<u8>,
    data: Vec<String>,
    done: bool,
}

impl<S> SseEventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            data: Vec::new(),
            done: false,
        }
    }

    fn accept_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        let line = match line {
            [head @ .., b'\r'] => head,
            _ => line,
        };
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if let Some(payload) = line.strip_prefix(b"data:") {
            let payload = payload.strip_prefix(b" ").unwrap_or(payload);
            self.data
                .push(String::from_utf8_lossy(payload).into_owned());
        }
        // `event:`, `id:`, `retry:` and comment lines are ignored.
        None
    }

    /// Consume buffered input up to the next complete event, if any.
    fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).take(end).collect();
            if let Some(event) = self.accept_line(&line) {
                return Some(event);
            }
        }
        None
    }

    /// Flush a trailing event once the input is exhausted.
    fn flush(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(event) = self.accept_line(&line) {
                return Some(event);
            }
        }
        if self.data.is_empty() {
            None
        } else {
            Some(SseEvent {
                data: std::mem::take(&mut self.data).join("\n"),
            })
        }
    }
}

impl<S> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<SseEvent, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(event) = this.next_event() {
                return Poll::Ready(Some(Ok(event)));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(LlmError::Request(e))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(this.flush().map(Ok));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
