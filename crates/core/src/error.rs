//! Core Error Types
//!
//! Errors raised by collaborators the orchestrator talks to through core
//! traits: tool backends, conversation stores, and configuration loading.
//! Provider failures have their own enum in `chatloop-llm`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Well-formed but out-of-range values
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A tool ran and reported a failure, or its transport failed
    #[error("Tool error: {0}")]
    Tool(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }
}
