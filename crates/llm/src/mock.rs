//! Scripted provider for tests.
//!
//! [`ScriptedProvider`] pops one [`ScriptedTurn`] per `stream`/`non_stream`
//! call and plays it back without touching the network. Every request is
//! recorded for later assertions.
//!
//! ```rust,no_run
//! use chatloop_llm::{ScriptedProvider, ScriptedTurn};
//! use serde_json::json;
//!
//! let provider = ScriptedProvider::new(vec![
//!     ScriptedTurn::text("Let me check.").with_tool_call("call_1", "get_time", json!({})),
//!     ScriptedTurn::text("It is noon."),
//! ]);
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chatloop_core::{CanonicalEvent, ToolDescriptor};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::provider::LlmProvider;
use crate::sse::StreamAccumulator;
use crate::types::{
    CompletionRequest, LlmError, LlmResponse, LlmResult, ProviderConfig, ProviderType, ToolCall,
    UsageStats,
};

/// One scripted model response.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    /// Streamed in order; may include inline `<think>` tags
    pub chunks: Vec<CanonicalEvent>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: UsageStats,
    pub stop_reason: Option<String>,
    /// Returned instead of a response, after the chunks are sent
    pub error: Option<LlmError>,
    /// Pause before each chunk
    pub chunk_delay: Option<Duration>,
    /// Never finish; only cancellation ends the call
    pub hang: bool,
}

impl ScriptedTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self::chunks(vec![text.into()])
    }

    /// Answer text split across several deltas.
    pub fn chunks(chunks: Vec<String>) -> Self {
        Self {
            chunks: chunks.into_iter().map(CanonicalEvent::text).collect(),
            ..Default::default()
        }
    }

    pub fn failing(error: LlmError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Streams its chunks, then waits for cancellation.
    pub fn hanging(chunks: Vec<String>) -> Self {
        Self {
            hang: true,
            ..Self::chunks(chunks)
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.chunks.insert(0, CanonicalEvent::reasoning(reasoning));
        self
    }

    pub fn with_tool_call(mut self, id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        self.tool_calls.push(ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        });
        self
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = UsageStats {
            input_tokens,
            output_tokens,
            reasoning_tokens: None,
        };
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
    config: ProviderConfig,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            config: ProviderConfig {
                provider: ProviderType::OpenAI,
                model: "scripted".to_string(),
                ..Default::default()
            },
        }
    }

    pub fn push(&self, turn: ScriptedTurn) {
        self.turns.lock().unwrap_or_else(|e| e.into_inner()).push_back(turn);
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_turn(&self, request: &CompletionRequest) -> LlmResult<ScriptedTurn> {
        request.validate()?;
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| LlmError::Other {
                message: "scripted provider has no turns left".to_string(),
            })
    }

    fn finish(&self, turn: ScriptedTurn) -> LlmResult<LlmResponse> {
        if let Some(error) = turn.error {
            return Err(error);
        }
        let mut acc = StreamAccumulator::new();
        for chunk in &turn.chunks {
            acc.absorb(chunk);
        }
        let mut response = acc.into_response(&self.config.model);
        response.stop_reason = match (&turn.stop_reason, turn.tool_calls.is_empty()) {
            (Some(reason), _) => reason.as_str().into(),
            (None, false) => crate::types::StopReason::ToolUse,
            (None, true) => crate::types::StopReason::EndTurn,
        };
        response.tool_calls = turn.tool_calls;
        response.usage = turn.usage;
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_reasoning(&self) -> bool {
        true
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    fn translate_tools(&self, tools: &[ToolDescriptor]) -> Value {
        Value::Array(tools.iter().map(|t| Value::String(t.name.clone())).collect())
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        sink: mpsc::Sender<CanonicalEvent>,
    ) -> LlmResult<LlmResponse> {
        let turn = self.next_turn(&request)?;

        for chunk in &turn.chunks {
            if let Some(delay) = turn.chunk_delay {
                tokio::select! {
                    biased;
                    _ = request.cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if request.cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            let _ = sink.send(chunk.clone()).await;
        }

        if turn.hang {
            request.cancel.cancelled().await;
            return Err(LlmError::Cancelled);
        }

        self.finish(turn)
    }

    async fn non_stream(&self, request: CompletionRequest) -> LlmResult<LlmResponse> {
        let turn = self.next_turn(&request)?;
        if turn.hang {
            request.cancel.cancelled().await;
            return Err(LlmError::Cancelled);
        }
        self.finish(turn)
    }

    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
