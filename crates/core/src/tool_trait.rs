//! Tool Contracts
//!
//! Types describing tools, the calls a model makes against them, and the
//! results fed back into the conversation. Execution itself is delegated to an
//! external subsystem behind [`ToolBackend`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

/// Default character budget for the log copy of a tool payload.
pub const DEFAULT_LOG_PAYLOAD_LIMIT: usize = 500;

/// A tool made available to the model. Supplied by the registry and read-only
/// to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Stable identifier, unique across servers
    pub id: String,
    /// Name the model uses to call the tool
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool arguments
    pub argument_schema: Value,
    /// Server providing the tool, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        argument_schema: Value,
    ) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            description: description.into(),
            argument_schema,
            server_id: None,
        }
    }

    /// Attach the descriptor to a tool server; the id becomes `server/name`.
    pub fn with_server(mut self, server_id: impl Into<String>) -> Self {
        let server_id = server_id.into();
        self.id = format!("{}/{}", server_id, self.name);
        self.server_id = Some(server_id);
        self
    }
}

/// Raw output of the external tool-execution subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    /// The tool ran but reported failure
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// External tool-execution subsystem (MCP client, IPC bridge, in-process tools).
///
/// Implementations may return `Err` for transport failures; the invoker turns
/// every failure into an error-flagged [`ToolCallResult`].
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn call_tool(&self, descriptor: &ToolDescriptor, arguments: Value)
        -> CoreResult<ToolOutput>;
}

/// How a tool call reached the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Structured call object from the provider API
    Native,
    /// Markup embedded in the model's text
    InlineMarkup,
}

/// Byte range of inline markup in the accumulated text, with the original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl RawSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &RawSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A request from the model to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub source_format: SourceFormat,
    /// Present only for inline markup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_span: Option<RawSpan>,
}

impl ToolCallRequest {
    pub fn native(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            source_format: SourceFormat::Native,
            raw_span: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Ok,
    Error,
}

/// Why a call resolved with `status = error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    NotFound,
    InvalidArguments,
    Timeout,
    Backend,
    BudgetExhausted,
}

/// The resolved outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolCallStatus,
    /// Tool output on success, human-readable message on error
    pub payload: String,
    pub truncated_payload_for_log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ToolCallResult {
    pub fn ok(call_id: impl Into<String>, tool_name: impl Into<String>, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            status: ToolCallStatus::Ok,
            truncated_payload_for_log: truncate_for_log(&payload, DEFAULT_LOG_PAYLOAD_LIMIT),
            payload,
            error_kind: None,
            elapsed_ms: 0,
        }
    }

    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        kind: ToolErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let payload = message.into();
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            status: ToolCallStatus::Error,
            truncated_payload_for_log: truncate_for_log(&payload, DEFAULT_LOG_PAYLOAD_LIMIT),
            payload,
            error_kind: Some(kind),
            elapsed_ms: 0,
        }
    }

    /// Recompute the log copy with a different character budget.
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.truncated_payload_for_log = truncate_for_log(&self.payload, limit);
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolCallStatus::Error
    }
}

/// Truncate to at most `limit` characters, appending a marker with the
/// number of characters dropped.
pub fn truncate_for_log(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{}... [{} more chars]", kept, total - limit)
}
