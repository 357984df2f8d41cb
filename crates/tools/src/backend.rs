//! Closure-Backed Tool Backend
//!
//! [`FunctionBackend`] serves tools from in-process async closures. It is the
//! simplest [`ToolBackend`]: handy for built-in tools and for tests that need
//! a controllable backend.
//!
//! ```rust,ignore
//! let backend = FunctionBackend::new()
//!     .with_tool("get_time", |_args| async { Ok(ToolOutput::ok("12:00")) });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use chatloop_core::{CoreError, CoreResult, ToolBackend, ToolDescriptor, ToolOutput};
use serde_json::Value;

type BoxedFuture = Pin<Box<dyn Future<Output = CoreResult<ToolOutput>> + Send>>;

/// Type alias for the async handler behind one tool.
pub type ToolHandler = Box<dyn Fn(Value) -> BoxedFuture + Send + Sync>;

#[derive(Default)]
pub struct FunctionBackend {
    handlers: HashMap<String, ToolHandler>,
    /// Tool names in the order they were dispatched
    calls: Mutex<Vec<String>>,
}

impl FunctionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<ToolOutput>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Box::new(move |args| Box::pin(handler(args))));
        self
    }

    /// Names of the tools dispatched so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ToolBackend for FunctionBackend {
    async fn call_tool(&self, descriptor: &ToolDescriptor, arguments: Value) -> CoreResult<ToolOutput> {
        let handler = self
            .handlers
            .get(&descriptor.name)
            .ok_or_else(|| CoreError::not_found(format!("no handler for tool '{}'", descriptor.name)))?;
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(descriptor.name.clone());
        handler(arguments).await
    }
}
