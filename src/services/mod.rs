//! Services
//!
//! The orchestration loop and the collaborators it works with.

pub mod agent_tasks;
pub mod collaborators;
pub mod orchestrator;
