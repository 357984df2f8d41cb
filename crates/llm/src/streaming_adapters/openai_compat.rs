//! OpenAI-Compatible SSE Adapter
//!
//! Chat Completions chunk format as served by OpenAI, DeepSeek and DashScope
//! (Qwen). Reasoning arrives in a dedicated `reasoning_content` (DeepSeek,
//! Qwen) or `reasoning` field; tool calls arrive as indexed argument fragments.

use std::collections::BTreeMap;

use chatloop_core::{AdapterError, CanonicalEvent, SourceFormat, StreamAdapter};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionDetails {
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Adapter for OpenAI-compatible chat completion streams
#[derive(Debug)]
pub struct OpenAICompatAdapter {
    provider: &'static str,
    /// Keyed by the `index` the API assigns to each parallel tool call
    pending: BTreeMap<usize, PendingCall>,
    stop_reason: Option<String>,
    done: bool,
}

impl OpenAICompatAdapter {
    pub fn new(provider: &'static str) -> Self {
        Self {
            provider,
            pending: BTreeMap::new(),
            stop_reason: None,
            done: false,
        }
    }

    fn flush_tools(&mut self) -> Vec<CanonicalEvent> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| {
                let arguments = if call.arguments.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&call.arguments)
                        .unwrap_or(serde_json::Value::String(call.arguments))
                };
                let call_id = if call.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    call.id
                };
                CanonicalEvent::ToolCallRequested {
                    call_id,
                    tool_name: call.name,
                    arguments,
                    source_format: SourceFormat::Native,
                }
            })
            .collect()
    }

    fn done_event(&mut self) -> CanonicalEvent {
        self.done = true;
        CanonicalEvent::Done {
            stop_reason: self.stop_reason.clone(),
        }
    }
}

impl StreamAdapter for OpenAICompatAdapter {
    fn provider_name(&self) -> &'static str {
        self.provider
    }

    fn supports_reasoning(&self) -> bool {
        true
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<CanonicalEvent>, AdapterError> {
        let trimmed = input.trim();

        let json_str = if let Some(rest) = trimmed.strip_prefix("data:") {
            rest.trim_start()
        } else if trimmed.starts_with('{') {
            trimmed
        } else {
            return Ok(vec![]);
        };

        if json_str == "[DONE]" {
            let mut events = self.flush_tools();
            if !self.done {
                events.push(self.done_event());
            }
            return Ok(events);
        }
        if json_str.is_empty() {
            return Ok(vec![]);
        }

        let chunk: ChunkEvent =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        let mut events = vec![];

        if let Some(error) = chunk.error {
            events.push(CanonicalEvent::Error {
                message: error.message,
                code: error.error_type,
                call_id: None,
                tool_name: None,
            });
            return Ok(events);
        }

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
                    if !reasoning.is_empty() {
                        events.push(CanonicalEvent::reasoning(reasoning));
                    }
                }

                if let Some(content) = delta.content {
                    if !content.is_empty() {
                        events.push(CanonicalEvent::text(content));
                    }
                }

                for (position, tc) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
                    let index = tc.index.unwrap_or(position);
                    let pending = self.pending.entry(index).or_default();
                    if let Some(id) = tc.id.filter(|id| !id.is_empty()) {
                        pending.id = id;
                    }
                    if let Some(func) = tc.function {
                        if let Some(name) = func.name.filter(|n| !n.is_empty()) {
                            pending.name = name;
                        }
                        if let Some(args) = func.arguments {
                            pending.arguments.push_str(&args);
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                events.extend(self.flush_tools());
                self.stop_reason = Some(reason);
            }
        }

        // With include_usage the usage chunk arrives after finish_reason,
        // carrying an empty choices array.
        if let Some(usage) = chunk.usage {
            events.push(CanonicalEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                reasoning_tokens: usage
                    .completion_tokens_details
                    .and_then(|d| d.reasoning_tokens),
            });
        }

        Ok(events)
    }

    fn finish(&mut self) -> Vec<CanonicalEvent> {
        let mut events = self.flush_tools();
        if !self.done {
            events.push(self.done_event());
        }
        events
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.stop_reason = None;
        self.done = false;
    }
}
