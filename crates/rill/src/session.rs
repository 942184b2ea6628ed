//! Streaming session state machine.
//!
//! Converts the provider's chunk stream into the ordered event protocol
//! while accumulating the final assistant message in parallel.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use serde_json::Map;
use tracing::warn;

use crate::error::LlmError;
use crate::types::{
    AssistantMessage, ContentBlock, StopReason, StreamEvent, TextBlock, ToolCallBlock, Usage,
};
use crate::wire::{ChunkStream, StreamChunk, ToolCallDelta};

/// Future resolving to the provider's raw chunk stream.
pub(crate) type Connect = BoxFuture<'static, Result<ChunkStream, LlmError>>;

/// A live streaming session.
///
/// Implements `Stream<Item = StreamEvent>`, yielding events in protocol
/// order: `Start`, `TextStart`, deltas while chunks arrive, then
/// `ToolCallEnd`s, `TextEnd` and `Done`. A failure while opening the wire
/// call or pulling chunks ends the session with a terminal `Error` event
/// instead. Single-pass: once drained it yields `None` forever.
pub struct ChatStream {
    phase: Phase,
    model: String,
    pending: VecDeque<StreamEvent>,
    text: String,
    calls: BTreeMap<u32, ToolCallAccumulator>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    message: Option<AssistantMessage>,
}

enum Phase {
    Start(Connect),
    TextStart(Connect),
    Connect(Connect),
    Streaming(ChunkStream),
    Ended,
}

impl ChatStream {
    pub(crate) fn new(model: String, connect: Connect) -> Self {
        Self {
            phase: Phase::Start(connect),
            model,
            pending: VecDeque::new(),
            text: String::new(),
            calls: BTreeMap::new(),
            usage: None,
            finish_reason: None,
            message: None,
        }
    }

    /// Drain any unconsumed events and return the accumulated message.
    ///
    /// Idempotent: the result is cached, and the wire call is never
    /// re-issued. After a terminal `Error` event the message holds whatever
    /// content accumulated before the failure.
    pub async fn message(&mut self) -> AssistantMessage {
        while self.next().await.is_some() {}
        self.message.clone().unwrap_or_default()
    }

    /// Fold one chunk into the accumulators, queueing the events it implies.
    fn absorb(&mut self, chunk: StreamChunk) {
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }
        if let Some(reason) = chunk.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }
        if let Some(delta) = chunk.content() {
            self.text.push_str(delta);
            self.pending.push_back(StreamEvent::TextDelta {
                delta: delta.to_string(),
            });
        }
        if let Some(fragments) = chunk.tool_calls() {
            for fragment in fragments {
                let index = fragment.index;
                let accumulator = match self.calls.entry(index) {
                    Entry::Vacant(slot) => {
                        self.pending.push_back(StreamEvent::ToolCallStart { index });
                        slot.insert(ToolCallAccumulator::default())
                    }
                    Entry::Occupied(slot) => slot.into_mut(),
                };
                accumulator.merge(fragment);
                if let Some(arguments) = fragment
                    .function
                    .as_ref()
                    .and_then(|f| f.arguments.as_deref())
                    && !arguments.is_empty()
                {
                    self.pending.push_back(StreamEvent::ToolCallDelta {
                        index,
                        delta: arguments.to_string(),
                    });
                }
            }
        }
    }

    /// Close out a successful session after the chunk stream drains.
    fn finish(&mut self) {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text(TextBlock {
                text: std::mem::take(&mut self.text),
            }));
        }
        for (index, accumulator) in std::mem::take(&mut self.calls) {
            let call = accumulator.finalize(index);
            self.pending.push_back(StreamEvent::ToolCallEnd {
                index,
                call: call.clone(),
            });
            content.push(ContentBlock::ToolCall(call));
        }
        self.pending.push_back(StreamEvent::TextEnd);
        self.pending.push_back(StreamEvent::Done {
            reason: StopReason::from_wire(self.finish_reason.as_deref()),
        });
        self.message = Some(AssistantMessage {
            content,
            usage: self.usage.clone(),
        });
    }

    /// Seal a failed session, keeping whatever content accumulated.
    fn fail(&mut self, error: LlmError) -> StreamEvent {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text(TextBlock {
                text: std::mem::take(&mut self.text),
            }));
        }
        for (index, accumulator) in std::mem::take(&mut self.calls) {
            content.push(ContentBlock::ToolCall(accumulator.finalize(index)));
        }
        self.message = Some(AssistantMessage {
            content,
            usage: self.usage.clone(),
        });
        StreamEvent::Error(error)
    }
}

impl Stream for ChatStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }

            match std::mem::replace(&mut this.phase, Phase::Ended) {
                Phase::Start(connect) => {
                    this.phase = Phase::TextStart(connect);
                    return Poll::Ready(Some(StreamEvent::Start {
                        model: this.model.clone(),
                    }));
                }
                Phase::TextStart(connect) => {
                    this.phase = Phase::Connect(connect);
                    return Poll::Ready(Some(StreamEvent::TextStart));
                }
                Phase::Connect(mut connect) => match connect.as_mut().poll(cx) {
                    Poll::Ready(Ok(chunks)) => {
                        this.phase = Phase::Streaming(chunks);
                    }
                    Poll::Ready(Err(error)) => {
                        return Poll::Ready(Some(this.fail(error)));
                    }
                    Poll::Pending => {
                        this.phase = Phase::Connect(connect);
                        return Poll::Pending;
                    }
                },
                Phase::Streaming(mut chunks) => match chunks.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(chunk))) => {
                        this.absorb(chunk);
                        this.phase = Phase::Streaming(chunks);
                    }
                    Poll::Ready(Some(Err(error))) => {
                        return Poll::Ready(Some(this.fail(error)));
                    }
                    Poll::Ready(None) => {
                        this.finish();
                    }
                    Poll::Pending => {
                        this.phase = Phase::Streaming(chunks);
                        return Poll::Pending;
                    }
                },
                Phase::Ended => return Poll::Ready(None),
            }
        }
    }
}

/// Merges tool-call fragments arriving for one content-block index.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn merge(&mut self, fragment: &ToolCallDelta) {
        if let Some(ref id) = fragment.id
            && !id.is_empty()
        {
            self.id = id.clone();
        }
        if let Some(ref function) = fragment.function {
            if let Some(ref name) = function.name
                && !name.is_empty()
            {
                self.name = name.clone();
            }
            if let Some(ref arguments) = function.arguments {
                self.arguments.push_str(arguments);
            }
        }
    }

    fn finalize(self, index: u32) -> ToolCallBlock {
        let arguments = if self.arguments.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str(&self.arguments) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        index,
                        tool_name = %self.name,
                        error = %e,
                        "failed to parse streamed tool call arguments, using empty object"
                    );
                    Map::new()
                }
            }
        };
        ToolCallBlock {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FunctionDelta, ToolCallDelta};
    use serde_json::json;

    fn fragment(id: Option<&str>, name: Option<&str>, arguments: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index: 0,
            id: id.map(str::to_string),
            function: Some(FunctionDelta {
                name: name.map(str::to_string),
                arguments: arguments.map(str::to_string),
            }),
        }
    }

    #[test]
    fn accumulator_merges_fragments() {
        let mut accumulator = ToolCallAccumulator::default();
        accumulator.merge(&fragment(Some("c1"), Some("search"), Some("{\"q\":")));
        accumulator.merge(&fragment(None, None, Some("\"rust\"}")));

        let call = accumulator.finalize(0);
        assert_eq!(call.id, "c1");
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments.get("q"), Some(&json!("rust")));
    }

    #[test]
    fn accumulator_degrades_bad_arguments() {
        let mut accumulator = ToolCallAccumulator::default();
        accumulator.merge(&fragment(Some("c1"), Some("f"), Some("{not json")));

        let call = accumulator.finalize(0);
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn accumulator_empty_arguments_become_empty_object() {
        let accumulator = ToolCallAccumulator::default();
        let call = accumulator.finalize(0);
        assert!(call.arguments.is_empty());
    }
}
