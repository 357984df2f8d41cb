//! Tool Invoker
//!
//! Validates arguments, dispatches to the [`ToolBackend`] under a timeout,
//! and shapes every outcome into a [`ToolCallResult`]. Nothing fails past
//! this boundary: timeouts, backend errors and bad arguments all come back
//! as `status = error` results the loop can replay to the model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatloop_core::{
    ToolBackend, ToolCallRequest, ToolCallResult, ToolDescriptor, ToolErrorKind,
    DEFAULT_LOG_PAYLOAD_LIMIT,
};
use serde_json::Value;

use crate::error::{ToolError, ToolResult};

/// Check `arguments` against a JSON Schema.
///
/// An empty or missing schema accepts anything.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> ToolResult<()> {
    match schema {
        Value::Null => return Ok(()),
        Value::Object(map) if map.is_empty() => return Ok(()),
        _ => {}
    }

    let validator =
        jsonschema::validator_for(schema).map_err(|e| ToolError::InvalidSchema(e.to_string()))?;
    let errors: Vec<String> = validator.iter_errors(arguments).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(errors.join("; ")))
    }
}

pub struct ToolInvoker {
    backend: Arc<dyn ToolBackend>,
    log_limit: usize,
}

impl ToolInvoker {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self {
            backend,
            log_limit: DEFAULT_LOG_PAYLOAD_LIMIT,
        }
    }

    /// Characters of payload kept in `truncated_payload_for_log`.
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit;
        self
    }

    /// Run one resolved call.
    pub async fn invoke(
        &self,
        request: &ToolCallRequest,
        descriptor: &ToolDescriptor,
        timeout: Duration,
    ) -> ToolCallResult {
        let started = Instant::now();
        let result = self.run(request, descriptor, timeout).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = result.with_log_limit(self.log_limit).with_elapsed_ms(elapsed_ms);

        if result.is_error() {
            tracing::warn!(
                call_id = %result.call_id,
                tool = %result.tool_name,
                kind = ?result.error_kind,
                elapsed_ms,
                error = %result.truncated_payload_for_log,
                "tool call failed"
            );
        } else {
            tracing::debug!(
                call_id = %result.call_id,
                tool = %result.tool_name,
                elapsed_ms,
                payload = %result.truncated_payload_for_log,
                "tool call succeeded"
            );
        }
        result
    }

    async fn run(
        &self,
        request: &ToolCallRequest,
        descriptor: &ToolDescriptor,
        timeout: Duration,
    ) -> ToolCallResult {
        let call_id = request.call_id.as_str();
        let tool = descriptor.name.as_str();

        match validate_arguments(&descriptor.argument_schema, &request.arguments) {
            Ok(()) => {}
            Err(ToolError::InvalidSchema(reason)) => {
                // The tool's own schema is broken; let the backend judge the arguments.
                tracing::warn!(tool, %reason, "skipping argument validation");
            }
            Err(e) => {
                return ToolCallResult::error(call_id, tool, ToolErrorKind::InvalidArguments, e.to_string());
            }
        }

        let call = self.backend.call_tool(descriptor, request.arguments.clone());
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(output)) if output.is_error => {
                ToolCallResult::error(call_id, tool, ToolErrorKind::Backend, output.content)
            }
            Ok(Ok(output)) => ToolCallResult::ok(call_id, tool, output.content),
            Ok(Err(e)) => ToolCallResult::error(call_id, tool, ToolErrorKind::Backend, e.to_string()),
            Err(_) => ToolCallResult::error(
                call_id,
                tool,
                ToolErrorKind::Timeout,
                format!("timeout after {} ms", timeout.as_millis()),
            ),
        }
    }
}
