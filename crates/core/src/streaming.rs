//! Canonical Stream Events
//!
//! Vendor-agnostic event types and the adapter trait used to turn each
//! provider's wire format into them. Provider adapters produce these events,
//! the orchestration loop completes them with tool-call resolution, and the
//! renderer consumes the final ordered stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool_trait::{SourceFormat, ToolCallRequest, ToolCallResult, ToolCallStatus, ToolErrorKind};

/// Canonical streaming event. Every provider adapter converts to this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// Answer text delta
    TextDelta { content: String },

    /// Reasoning/thinking text delta, kept apart from the answer
    ReasoningDelta { content: String },

    /// The model asked for a tool to be run
    ToolCallRequested {
        call_id: String,
        tool_name: String,
        arguments: Value,
        source_format: SourceFormat,
    },

    /// A requested tool call finished (successfully or not)
    ToolCallResolved {
        call_id: String,
        tool_name: String,
        status: ToolCallStatus,
        payload: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<ToolErrorKind>,
    },

    /// Token usage information
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_tokens: Option<u32>,
    },

    /// Terminal error for the current turn
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },

    /// Stream complete
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl CanonicalEvent {
    pub fn text(content: impl Into<String>) -> Self {
        CanonicalEvent::TextDelta {
            content: content.into(),
        }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        CanonicalEvent::ReasoningDelta {
            content: content.into(),
        }
    }

    /// Error event with a reason code and no tool context.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        CanonicalEvent::Error {
            message: message.into(),
            code: Some(code.into()),
            call_id: None,
            tool_name: None,
        }
    }

    pub fn requested(request: &ToolCallRequest) -> Self {
        CanonicalEvent::ToolCallRequested {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            arguments: request.arguments.clone(),
            source_format: request.source_format,
        }
    }

    pub fn resolved(result: &ToolCallResult) -> Self {
        CanonicalEvent::ToolCallResolved {
            call_id: result.call_id.clone(),
            tool_name: result.tool_name.clone(),
            status: result.status,
            payload: result.payload.clone(),
            error_kind: result.error_kind,
        }
    }

    /// `Done` and `Error` end a turn's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CanonicalEvent::Done { .. } | CanonicalEvent::Error { .. })
    }
}

/// Error type for stream adapters
#[derive(Debug, Clone)]
pub enum AdapterError {
    /// Invalid format that couldn't be parsed
    InvalidFormat(String),
    /// JSON/data parsing error
    ParseError(String),
    /// Event type not supported by this adapter
    UnsupportedEvent(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            AdapterError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AdapterError::UnsupportedEvent(msg) => write!(f, "Unsupported event: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Converts one provider's stream framing into canonical events.
///
/// Adapters are stateful: tool-call arguments and usage often arrive across
/// several lines. Native tool calls are reported as `ToolCallRequested` with
/// [`SourceFormat::Native`] once their arguments are complete.
pub trait StreamAdapter: Send + Sync {
    /// Returns the provider name for logging and identification.
    fn provider_name(&self) -> &'static str;

    /// Returns whether this adapter/provider supports a dedicated reasoning field.
    fn supports_reasoning(&self) -> bool;

    /// Returns whether this adapter/provider supports native tool calls.
    fn supports_tools(&self) -> bool;

    /// Adapt a raw stream line/chunk to canonical events.
    ///
    /// A single input line may produce zero, one, or multiple events.
    fn adapt(&mut self, input: &str) -> Result<Vec<CanonicalEvent>, AdapterError>;

    /// Emit anything still buffered when the byte stream ends without a
    /// terminal frame.
    fn finish(&mut self) -> Vec<CanonicalEvent> {
        Vec::new()
    }

    /// Reset adapter state for a new stream.
    fn reset(&mut self) {}
}
