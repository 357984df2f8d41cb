//! Anthropic Messages API Adapter
//!
//! Handles the SSE format from the Messages API: `content_block_*` events
//! carrying text, thinking, and incrementally streamed tool input JSON.

use chatloop_core::{AdapterError, CanonicalEvent, SourceFormat, StreamAdapter};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockStart {
        #[allow(dead_code)]
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        #[allow(dead_code)]
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Adapter for the Anthropic SSE format
#[derive(Debug, Default)]
pub struct AnthropicAdapter {
    current_tool_id: Option<String>,
    current_tool_name: Option<String>,
    tool_input_buffer: String,
    input_tokens: u32,
    stop_reason: Option<String>,
    done: bool,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_tool(&mut self) -> Option<CanonicalEvent> {
        let id = self.current_tool_id.take()?;
        let name = self.current_tool_name.take()?;
        let raw = std::mem::take(&mut self.tool_input_buffer);
        // A tool with no parameters streams no input JSON at all.
        let arguments = if raw.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(tool = %name, error = %e, "tool input JSON did not parse");
                    serde_json::Value::String(raw)
                }
            }
        };
        Some(CanonicalEvent::ToolCallRequested {
            call_id: id,
            tool_name: name,
            arguments,
            source_format: SourceFormat::Native,
        })
    }
}

impl StreamAdapter for AnthropicAdapter {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn supports_reasoning(&self) -> bool {
        true
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<CanonicalEvent>, AdapterError> {
        let trimmed = input.trim();

        // SSE streams interleave event:, id:, retry: and comment lines.
        let json_str = if let Some(rest) = trimmed.strip_prefix("data:") {
            rest.trim_start()
        } else if trimmed.starts_with('{') {
            trimmed
        } else {
            return Ok(vec![]);
        };

        if json_str.is_empty() || json_str == "[DONE]" {
            return Ok(vec![]);
        }

        let event: AnthropicEvent =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        let events = match event {
            AnthropicEvent::MessageStart { message } => match message.usage {
                Some(usage) => {
                    self.input_tokens = usage.input_tokens;
                    vec![CanonicalEvent::Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        reasoning_tokens: None,
                    }]
                }
                None => vec![],
            },
            AnthropicEvent::ContentBlockStart { content_block, .. } => {
                if let ContentBlock::ToolUse { id, name } = content_block {
                    self.current_tool_id = Some(id);
                    self.current_tool_name = Some(name);
                    self.tool_input_buffer.clear();
                }
                vec![]
            }
            AnthropicEvent::ContentBlockDelta { delta, .. } => match delta {
                Delta::TextDelta { text } => vec![CanonicalEvent::text(text)],
                Delta::ThinkingDelta { thinking } => vec![CanonicalEvent::reasoning(thinking)],
                Delta::InputJsonDelta { partial_json } => {
                    self.tool_input_buffer.push_str(&partial_json);
                    vec![]
                }
                Delta::Other => vec![],
            },
            AnthropicEvent::ContentBlockStop { .. } => self.flush_tool().into_iter().collect(),
            AnthropicEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                match usage {
                    Some(u) => vec![CanonicalEvent::Usage {
                        input_tokens: self.input_tokens,
                        output_tokens: u.output_tokens,
                        reasoning_tokens: None,
                    }],
                    None => vec![],
                }
            }
            AnthropicEvent::MessageStop => {
                self.done = true;
                vec![CanonicalEvent::Done {
                    stop_reason: self.stop_reason.clone(),
                }]
            }
            AnthropicEvent::Error { error } => vec![CanonicalEvent::Error {
                message: error.message,
                code: error.error_type,
                call_id: None,
                tool_name: None,
            }],
            AnthropicEvent::Ping | AnthropicEvent::Unknown => vec![],
        };

        Ok(events)
    }

    fn finish(&mut self) -> Vec<CanonicalEvent> {
        let mut events: Vec<CanonicalEvent> = self.flush_tool().into_iter().collect();
        if !self.done {
            self.done = true;
            events.push(CanonicalEvent::Done {
                stop_reason: self.stop_reason.clone(),
            });
        }
        events
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
