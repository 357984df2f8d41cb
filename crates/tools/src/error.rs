//! Tool Errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// No tool with this name is registered
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Arguments failed schema validation
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The descriptor's schema is itself malformed
    #[error("Invalid tool schema: {0}")]
    InvalidSchema(String),
}

pub type ToolResult<T> = Result<T, ToolError>;
