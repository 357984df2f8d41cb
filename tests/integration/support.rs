//! Shared fixtures for the integration tests.

use std::sync::Arc;
use std::time::Duration;

use chatloop::{Orchestrator, OrchestratorConfig, TurnOutcome, TurnRequest};
use chatloop_core::{CanonicalEvent, CoreError, ToolDescriptor, ToolOutput};
use chatloop_llm::ScriptedProvider;
use chatloop_tools::{FunctionBackend, ToolRegistry};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn get_time_tool() -> ToolDescriptor {
    ToolDescriptor::new("get_time", "Current time of day", json!({"type": "object", "properties": {}}))
}

pub fn search_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "search",
        "Search the web",
        json!({
            "type": "object",
            "properties": {"q": {"type": "string", "description": "Query"}},
            "required": ["q"]
        }),
    )
    .with_server("web")
}

pub fn slow_tool() -> ToolDescriptor {
    ToolDescriptor::new("slow", "Takes a while", json!({}))
}

pub fn registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::from_descriptors(vec![get_time_tool(), search_tool(), slow_tool()]))
}

pub fn backend() -> Arc<FunctionBackend> {
    Arc::new(
        FunctionBackend::new()
            .with_tool("get_time", |_| async { Ok(ToolOutput::ok("12:00")) })
            .with_tool("search", |args| async move {
                let q = args["q"].as_str().unwrap_or_default().to_string();
                Ok(ToolOutput::ok(format!("3 results for {}", q)))
            })
            .with_tool("slow", |_| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(ToolOutput::ok("finally"))
            })
            .with_tool("broken", |_| async { Err(CoreError::tool("backend unreachable")) }),
    )
}

pub fn orchestrator(
    provider: &Arc<ScriptedProvider>,
    backend: &Arc<FunctionBackend>,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(provider.clone(), registry(), backend.clone(), config)
}

/// Run a turn to the end and collect every event it emitted.
pub async fn run(orchestrator: &Orchestrator, request: TurnRequest) -> (TurnOutcome, Vec<CanonicalEvent>) {
    run_with_cancel(orchestrator, request, CancellationToken::new()).await
}

pub async fn run_with_cancel(
    orchestrator: &Orchestrator,
    request: TurnRequest,
    cancel: CancellationToken,
) -> (TurnOutcome, Vec<CanonicalEvent>) {
    let (tx, mut rx) = mpsc::channel(1024);
    let outcome = orchestrator.run_turn(request, tx, cancel).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (outcome, events)
}

pub fn answer_text(events: &[CanonicalEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            CanonicalEvent::TextDelta { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

pub fn reasoning_text(events: &[CanonicalEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            CanonicalEvent::ReasoningDelta { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

pub fn count_requested(events: &[CanonicalEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CanonicalEvent::ToolCallRequested { .. }))
        .count()
}

pub fn count_resolved(events: &[CanonicalEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CanonicalEvent::ToolCallResolved { .. }))
        .count()
}
