//! Chatloop Tools
//!
//! Everything between a model's tool request and the tool's result:
//! - `detection` - finding tool-call markup in generated text
//! - `placement` - laying tool status blocks back into the prose
//! - `registry` - name to descriptor resolution
//! - `invoker` - schema validation, dispatch with a timeout, uniform results
//! - `backend` - closure-backed [`chatloop_core::ToolBackend`] for in-process tools
//!
//! The external execution subsystem itself sits behind
//! [`chatloop_core::ToolBackend`].

pub mod backend;
pub mod detection;
pub mod error;
pub mod invoker;
pub mod placement;
pub mod registry;

pub use backend::FunctionBackend;
pub use detection::{
    build_tool_use_instructions, detect_tool_calls, find_markers, format_tool_result, marker,
    strip_markers, Detection,
};
pub use error::{ToolError, ToolResult};
pub use invoker::{validate_arguments, ToolInvoker};
pub use placement::{
    layout_segments, IntentPhrasePlacement, PlacementStrategy, Segment, TrailingPlacement,
};
pub use registry::ToolRegistry;
