//! Chatloop Core
//!
//! Foundational types shared by every crate in the workspace. This crate has
//! no dependency on providers, HTTP, or the orchestrator.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `streaming` - Canonical stream events and the provider stream adapter trait
//! - `thinking` - Splitting inline `<think>` tags into a reasoning channel
//! - `tool_trait` - Tool descriptors, call requests/results, and the tool backend trait

pub mod error;
pub mod streaming;
pub mod thinking;
pub mod tool_trait;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, CanonicalEvent, StreamAdapter};

// ── Reasoning Separation ───────────────────────────────────────────────
pub use thinking::{ThinkSegment, ThinkTagSplitter};

// ── Tool Contracts ─────────────────────────────────────────────────────
pub use tool_trait::{
    truncate_for_log, RawSpan, SourceFormat, ToolBackend, ToolCallRequest, ToolCallResult,
    ToolCallStatus, ToolDescriptor, ToolErrorKind, ToolOutput, DEFAULT_LOG_PAYLOAD_LIMIT,
};
