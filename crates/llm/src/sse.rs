//! Stream Driving
//!
//! Shared by every HTTP provider: reads the response body as it arrives,
//! splits it into lines, feeds each line to the provider's [`StreamAdapter`],
//! forwards answer/reasoning deltas, and aggregates everything else into an
//! [`LlmResponse`]. Works for both SSE (`data: ...`) and NDJSON framing.

use chatloop_core::{CanonicalEvent, StreamAdapter};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{LlmError, LlmResponse, LlmResult, StopReason, ToolCall, UsageStats};

/// Folds canonical events into an aggregated response.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    usage: UsageStats,
    stop_reason: Option<StopReason>,
    error: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event. Returns true when the event should be forwarded to
    /// the sink (answer and reasoning deltas only).
    pub fn absorb(&mut self, event: &CanonicalEvent) -> bool {
        match event {
            CanonicalEvent::TextDelta { content } => {
                self.content.push_str(content);
                true
            }
            CanonicalEvent::ReasoningDelta { content } => {
                self.reasoning.push_str(content);
                true
            }
            CanonicalEvent::ToolCallRequested {
                call_id,
                tool_name,
                arguments,
                ..
            } => {
                self.tool_calls.push(ToolCall {
                    id: call_id.clone(),
                    name: tool_name.clone(),
                    arguments: arguments.clone(),
                });
                false
            }
            CanonicalEvent::Usage {
                input_tokens,
                output_tokens,
                reasoning_tokens,
            } => {
                // Providers report cumulative counts; keep the largest seen.
                self.usage.input_tokens = self.usage.input_tokens.max(*input_tokens);
                self.usage.output_tokens = self.usage.output_tokens.max(*output_tokens);
                if reasoning_tokens.is_some() {
                    self.usage.reasoning_tokens = *reasoning_tokens;
                }
                false
            }
            CanonicalEvent::Done { stop_reason } => {
                if let Some(reason) = stop_reason {
                    self.stop_reason = Some(StopReason::from(reason.as_str()));
                }
                false
            }
            CanonicalEvent::Error { message, .. } => {
                self.error = Some(message.clone());
                false
            }
            CanonicalEvent::ToolCallResolved { .. } => false,
        }
    }

    /// Error reported in-band by the provider, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn into_response(self, model: &str) -> LlmResponse {
        let stop_reason = match self.stop_reason {
            Some(reason) => reason,
            None if !self.tool_calls.is_empty() => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };
        LlmResponse {
            content: (!self.content.is_empty()).then_some(self.content),
            reasoning: (!self.reasoning.is_empty()).then_some(self.reasoning),
            tool_calls: self.tool_calls,
            stop_reason,
            usage: self.usage,
            model: model.to_string(),
        }
    }
}

/// Drive a streaming HTTP response to completion.
pub async fn drive_stream(
    response: reqwest::Response,
    adapter: &mut dyn StreamAdapter,
    sink: &mpsc::Sender<CanonicalEvent>,
    cancel: &CancellationToken,
    model: &str,
) -> LlmResult<LlmResponse> {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut acc = StreamAccumulator::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(LlmError::network)?;
        buffer.extend_from_slice(&chunk);

        // Split on raw bytes so multi-byte characters spanning chunks survive.
        while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            feed_line(&line, adapter, &mut acc, sink).await;
        }
    }

    if !buffer.is_empty() {
        let line = String::from_utf8_lossy(&buffer).into_owned();
        feed_line(&line, adapter, &mut acc, sink).await;
    }
    for event in adapter.finish() {
        forward(event, &mut acc, sink).await;
    }

    if let Some(message) = acc.error() {
        return Err(LlmError::ServerError {
            message: message.to_string(),
            status: None,
        });
    }
    Ok(acc.into_response(model))
}

async fn feed_line(
    line: &str,
    adapter: &mut dyn StreamAdapter,
    acc: &mut StreamAccumulator,
    sink: &mpsc::Sender<CanonicalEvent>,
) {
    if line.trim().is_empty() {
        return;
    }
    match adapter.adapt(line) {
        Ok(events) => {
            for event in events {
                forward(event, acc, sink).await;
            }
        }
        Err(e) => {
            tracing::warn!(provider = adapter.provider_name(), error = %e, "skipping malformed stream line");
        }
    }
}

async fn forward(event: CanonicalEvent, acc: &mut StreamAccumulator, sink: &mpsc::Sender<CanonicalEvent>) {
    if acc.absorb(&event) {
        let _ = sink.send(event).await;
    }
}
