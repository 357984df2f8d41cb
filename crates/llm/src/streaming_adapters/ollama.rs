//! Ollama Chat Adapter
//!
//! Handles the NDJSON stream of `/api/chat`. Newer Ollama versions put
//! reasoning in `message.thinking`; older reasoning models emit inline
//! `<think>` tags in `message.content`, which are passed through as answer
//! text and separated downstream.

use chatloop_core::{AdapterError, CanonicalEvent, SourceFormat, StreamAdapter};
use serde::Deserialize;

/// Known model families that reason before answering
const THINKING_MODELS: &[&str] = &["deepseek-r1", "qwq", "qwen3", "gpt-oss"];

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Adapter for the Ollama NDJSON chat stream
#[derive(Debug)]
pub struct OllamaAdapter {
    model: String,
    /// Ollama assigns no call ids; they are numbered per stream.
    call_counter: usize,
    done: bool,
}

impl OllamaAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            call_counter: 0,
            done: false,
        }
    }

    pub fn model_supports_thinking(model: &str) -> bool {
        let model = model.to_lowercase();
        THINKING_MODELS.iter().any(|known| model.contains(known))
    }
}

impl StreamAdapter for OllamaAdapter {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn supports_reasoning(&self) -> bool {
        Self::model_supports_thinking(&self.model)
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<CanonicalEvent>, AdapterError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(vec![]);
        }

        let chunk: ChatChunk =
            serde_json::from_str(trimmed).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        if let Some(error) = chunk.error {
            return Ok(vec![CanonicalEvent::Error {
                message: error,
                code: Some("ollama_error".to_string()),
                call_id: None,
                tool_name: None,
            }]);
        }

        let mut events = vec![];

        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                events.push(CanonicalEvent::reasoning(thinking));
            }
            if let Some(content) = message.content.filter(|c| !c.is_empty()) {
                events.push(CanonicalEvent::text(content));
            }
            for call in message.tool_calls.unwrap_or_default() {
                self.call_counter += 1;
                let arguments = if call.function.arguments.is_null() {
                    serde_json::json!({})
                } else {
                    call.function.arguments
                };
                events.push(CanonicalEvent::ToolCallRequested {
                    call_id: format!("ollama_call_{}", self.call_counter),
                    tool_name: call.function.name,
                    arguments,
                    source_format: SourceFormat::Native,
                });
            }
        }

        if chunk.done {
            events.push(CanonicalEvent::Usage {
                input_tokens: chunk.prompt_eval_count.unwrap_or(0),
                output_tokens: chunk.eval_count.unwrap_or(0),
                reasoning_tokens: None,
            });
            self.done = true;
            let stop_reason = if self.call_counter > 0 {
                Some("tool_use".to_string())
            } else {
                chunk.done_reason
            };
            events.push(CanonicalEvent::Done { stop_reason });
        }

        Ok(events)
    }

    fn finish(&mut self) -> Vec<CanonicalEvent> {
        if self.done {
            return vec![];
        }
        self.done = true;
        vec![CanonicalEvent::Done { stop_reason: None }]
    }

    fn reset(&mut self) {
        self.call_counter = 0;
        self.done = false;
    }
}
