//! Orchestrator Module
//!
//! Coordinates LLM provider calls with tool execution in a bounded round loop.

mod config;
mod error;
mod history;
mod service;
mod sink;
mod state;

pub use config::{CredentialRotation, OrchestratorConfig};
pub use error::TurnError;
pub use history::{Attachment, ConversationMessage, HistoryBuilder};
pub use service::{Orchestrator, TurnOutcome, TurnRequest};
pub use sink::EventSink;
pub use state::{LoopPhase, LoopState, TurnLatency, TurnStatus};
