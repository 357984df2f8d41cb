//! Chatloop
//!
//! A streaming completion orchestrator with tool calling. One turn streams a
//! model response, detects the tool calls it contains (native call objects
//! or inline markup), runs them against an external tool backend, feeds the
//! results back, and keeps going until the model is done or a round limit
//! is reached.
//!
//! - `services::orchestrator` - the round loop, history, config, and turn outcome
//! - `services::agent_tasks` - task mirror of tool calls and the session budget
//! - `services::collaborators` - prompt builder and conversation store contracts
//!
//! Providers live in `chatloop-llm`, detection and invocation in
//! `chatloop-tools`, and shared event/tool types in `chatloop-core`.

pub mod services;

pub use services::agent_tasks::{AgentTask, AgentTaskStatus, AgentTaskTracker};
pub use services::collaborators::{
    ConversationStore, DefaultPromptBuilder, InMemoryConversationStore, PromptBuilder,
};
pub use services::orchestrator::{
    Attachment, ConversationMessage, CredentialRotation, EventSink, HistoryBuilder, LoopPhase,
    LoopState, Orchestrator, OrchestratorConfig, TurnError, TurnLatency, TurnOutcome,
    TurnRequest, TurnStatus,
};
