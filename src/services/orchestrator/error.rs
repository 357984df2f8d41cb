//! Turn Errors

use chatloop_llm::LlmError;
use thiserror::Error;

/// Why a turn ended without completing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TurnError {
    /// The provider call failed; the core does not retry
    #[error("Transport error: {0}")]
    Transport(LlmError),

    /// The model asked for another tool round after the last allowed one
    #[error("Round limit exceeded: at most {max_rounds} tool rounds per turn")]
    RoundLimitExceeded {
        max_rounds: u32,
        call_id: Option<String>,
        tool_name: Option<String>,
    },

    #[error("Turn cancelled")]
    Cancelled,
}

impl TurnError {
    /// Reason code carried by the terminal `Error` event.
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::Transport(_) => "transport",
            TurnError::RoundLimitExceeded { .. } => "round_limit_exceeded",
            TurnError::Cancelled => "cancelled",
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            TurnError::RoundLimitExceeded { call_id, .. } => call_id.as_deref(),
            _ => None,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            TurnError::RoundLimitExceeded { tool_name, .. } => tool_name.as_deref(),
            _ => None,
        }
    }
}
