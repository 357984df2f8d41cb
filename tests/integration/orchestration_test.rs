//! Orchestration Loop Integration Tests
//!
//! Full turns through `Orchestrator::run_turn` with a scripted provider:
//! - plain text, native calls, inline calls in prompt mode
//! - tool timeouts and backend failures folded into the conversation
//! - round limit, zero-round mode, and the session budget
//! - cancellation while streaming and while a tool runs
//! - task tracking and persistence

use std::sync::Arc;
use std::time::Duration;

use chatloop::{
    AgentTaskStatus, ConversationStore, InMemoryConversationStore, OrchestratorConfig,
    TurnRequest, TurnStatus,
};
use chatloop_core::{CanonicalEvent, SourceFormat, ToolCallStatus, ToolErrorKind};
use chatloop_llm::{LlmError, MessageContent, ScriptedProvider, ScriptedTurn, ToolCallingMode};
use chatloop_tools::{IntentPhrasePlacement, Segment};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::support::*;

fn prompt_mode() -> OrchestratorConfig {
    OrchestratorConfig {
        tool_calling_mode: ToolCallingMode::Prompt,
        ..Default::default()
    }
}

// ============================================================================
// Scenario A: plain text
// ============================================================================

#[tokio::test]
async fn test_plain_text_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::chunks(vec!["Hello".into(), ", world".into()]).with_usage(12, 4),
    ]));
    let backend = backend();
    let orchestrator = orchestrator(&provider, &backend, OrchestratorConfig::default());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.rounds, 0);
    assert_eq!(outcome.final_text, "Hello, world");
    assert_eq!(outcome.usage.input_tokens, 12);
    assert_eq!(outcome.history.len(), 2);
    assert!(outcome.latency.first_token_ms.is_some());
    assert_eq!(
        events,
        vec![
            CanonicalEvent::text("Hello"),
            CanonicalEvent::text(", world"),
            CanonicalEvent::Usage {
                input_tokens: 12,
                output_tokens: 4,
                reasoning_tokens: None,
            },
            CanonicalEvent::Done {
                stop_reason: Some("end_turn".into()),
            },
        ]
    );
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_inline_think_tags_go_to_reasoning() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::chunks(vec![
        "<thi".into(),
        "nk>2+2 is 4</th".into(),
        "ink>The answer is 4.".into(),
    ])]));
    let orchestrator = orchestrator(&provider, &backend(), OrchestratorConfig::default());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "2+2?")).await;

    assert_eq!(reasoning_text(&events), "2+2 is 4");
    assert_eq!(answer_text(&events), "The answer is 4.");
    assert_eq!(outcome.reasoning, "2+2 is 4");
    assert_eq!(outcome.final_text, "The answer is 4.");
    assert!(outcome.latency.first_answer_token_ms >= outcome.latency.first_token_ms);
}

#[tokio::test]
async fn test_unterminated_reasoning_is_closed_at_stream_end() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("<think>still going")]));
    let orchestrator = orchestrator(&provider, &backend(), OrchestratorConfig::default());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "hm")).await;

    assert_eq!(reasoning_text(&events), "still going");
    assert_eq!(answer_text(&events), "");
    assert!(outcome.is_completed());
}

// ============================================================================
// Scenario B: native tool call
// ============================================================================

#[tokio::test]
async fn test_native_get_time() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text("Let me check the time.")
            .with_tool_call("call_1", "get_time", json!({}))
            .with_usage(20, 5),
        ScriptedTurn::text("It is 12:00.").with_usage(30, 6),
    ]));
    let backend = backend();
    let orchestrator = orchestrator(&provider, &backend, OrchestratorConfig::default());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "What time is it?")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.final_text, "It is 12:00.");
    assert_eq!(outcome.usage.input_tokens, 50);
    assert_eq!(outcome.usage.output_tokens, 11);

    assert_eq!(events[0], CanonicalEvent::text("Let me check the time."));
    assert!(matches!(
        &events[1],
        CanonicalEvent::ToolCallRequested { call_id, tool_name, source_format: SourceFormat::Native, .. }
            if call_id == "call_1" && tool_name == "get_time"
    ));
    assert!(matches!(
        &events[2],
        CanonicalEvent::ToolCallResolved { call_id, status: ToolCallStatus::Ok, payload, .. }
            if call_id == "call_1" && payload == "12:00"
    ));
    assert_eq!(events[3], CanonicalEvent::text("It is 12:00."));
    assert!(matches!(events.last(), Some(CanonicalEvent::Done { .. })));

    // user, assistant(call), tool results, final assistant
    assert_eq!(outcome.history.len(), 4);
    assert_eq!(outcome.history[1].tool_calls.len(), 1);
    assert_eq!(outcome.history[2].tool_results[0].payload, "12:00");

    let replay = &provider.requests()[1];
    assert_eq!(replay.messages.len(), 3);
    assert!(replay.messages[1]
        .content
        .iter()
        .any(|c| matches!(c, MessageContent::ToolUse { id, .. } if id == "call_1")));
    let results_msg = &replay.messages[2];
    assert!(matches!(
        &results_msg.content[0],
        MessageContent::ToolResult { tool_use_id, content, .. } if tool_use_id == "call_1" && content == "12:00"
    ));
    assert_eq!(
        results_msg.content.last(),
        Some(&MessageContent::Text {
            text: OrchestratorConfig::default().continuation_instruction
        })
    );
}

#[tokio::test]
async fn test_native_tools_forwarded_on_the_wire() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("ok")]));
    let orchestrator = orchestrator(&provider, &backend(), OrchestratorConfig::default());

    run(&orchestrator, TurnRequest::new("t1", "hi").with_base_prompt("Be brief.")).await;

    let request = &provider.requests()[0];
    assert_eq!(request.wire_tools().len(), 3);
    let system = request.system.as_deref().unwrap_or_default();
    assert!(system.starts_with("Be brief."));
    assert!(system.contains("Connected tool servers: web"));
    assert!(!system.contains("```tool_call"));
}

#[tokio::test]
async fn test_intent_phrase_placement_for_native_calls() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text("Sure. Let me check the clock. One moment.")
            .with_tool_call("call_1", "get_time", json!({})),
        ScriptedTurn::text("Noon."),
    ]));
    let orchestrator = orchestrator(&provider, &backend(), OrchestratorConfig::default())
        .with_placement(Arc::new(IntentPhrasePlacement::default()));

    let (outcome, _) = run(&orchestrator, TurnRequest::new("t1", "time?")).await;

    assert_eq!(outcome.segments.len(), 4);
    assert_eq!(outcome.segments[0], Segment::Text("Sure. Let me check the clock.".into()));
    assert!(matches!(&outcome.segments[1], Segment::ToolStatus(r) if r.call_id == "call_1"));
    assert_eq!(outcome.segments[2], Segment::Text(" One moment.".into()));
    assert_eq!(outcome.segments[3], Segment::Text("Noon.".into()));
}

// ============================================================================
// Scenario C: inline JSON in prompt mode
// ============================================================================

#[tokio::test]
async fn test_prompt_mode_inline_search() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::chunks(vec![
            "I'll search for that. ".into(),
            r#"{"tool": "search", "#.into(),
            r#""arguments": {"q": "rust async"}}"#.into(),
        ]),
        ScriptedTurn::text("Found 3 results."),
    ]));
    let backend = backend();
    let orchestrator = orchestrator(&provider, &backend, prompt_mode());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "look up rust async")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.rounds, 1);
    assert_eq!(backend.calls(), vec!["search"]);

    let requested = events
        .iter()
        .find_map(|e| match e {
            CanonicalEvent::ToolCallRequested {
                call_id,
                arguments,
                source_format,
                ..
            } => Some((call_id.clone(), arguments.clone(), *source_format)),
            _ => None,
        })
        .expect("a tool call was requested");
    assert_eq!(requested.0, "call_r1_1");
    assert_eq!(requested.1, json!({"q": "rust async"}));
    assert_eq!(requested.2, SourceFormat::InlineMarkup);

    // No schema on the wire; instructions in the system prompt instead.
    let first = &provider.requests()[0];
    assert!(first.wire_tools().is_empty());
    assert!(first.system.as_deref().unwrap_or_default().contains("```tool_call"));

    // Replay: markup stripped from the assistant turn, result rendered as text.
    let replay = &provider.requests()[1];
    assert_eq!(replay.messages[1].text_content(), "I'll search for that.");
    let results_text = replay.messages[2].text_content();
    assert!(results_text.starts_with("[Tool Result: search (id: call_r1_1)]\n3 results for rust async"));

    assert_eq!(outcome.history[1].content, "I'll search for that. [[tool_call:call_r1_1]]");
    assert_eq!(outcome.segments[0], Segment::Text("I'll search for that. ".into()));
    assert!(matches!(&outcome.segments[1], Segment::ToolStatus(r) if r.payload == "3 results for rust async"));
    assert_eq!(outcome.segments[2], Segment::Text("Found 3 results.".into()));
}

#[tokio::test]
async fn test_prompt_mode_invalid_arguments_are_replayed_as_errors() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text(r#"<tool_call>{"tool": "search", "arguments": {"query": "x"}}</tool_call>"#),
        ScriptedTurn::text("Sorry, let me fix that."),
    ]));
    let backend = backend();
    let orchestrator = orchestrator(&provider, &backend, prompt_mode());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "search x")).await;

    assert!(outcome.is_completed());
    assert_eq!(backend.call_count(), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        CanonicalEvent::ToolCallResolved { error_kind: Some(ToolErrorKind::InvalidArguments), .. }
    )));
    assert!(provider.requests()[1].messages[2].text_content().starts_with("[Tool Error: search"));
}

#[tokio::test]
async fn test_prompt_mode_unknown_inline_tool_stays_text() {
    let text = r#"Here is an example: {"tool": "format_disk", "arguments": {}}"#;
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text(text)]));
    let orchestrator = orchestrator(&provider, &backend(), prompt_mode());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "example?")).await;

    assert!(outcome.is_completed());
    assert_eq!(count_requested(&events), 0);
    assert_eq!(outcome.final_text, text);
}

// ============================================================================
// Scenario D: tool timeout and failures
// ============================================================================

#[tokio::test]
async fn test_tool_timeout_is_folded_into_history() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::default().with_tool_call("call_1", "slow", json!({})),
        ScriptedTurn::text("The tool timed out, sorry."),
    ]));
    let config = OrchestratorConfig {
        per_tool_invocation_timeout_ms: 20,
        ..Default::default()
    };
    let orchestrator = orchestrator(&provider, &backend(), config);

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "do the slow thing")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert!(events.iter().any(|e| matches!(
        e,
        CanonicalEvent::ToolCallResolved { status: ToolCallStatus::Error, error_kind: Some(ToolErrorKind::Timeout), .. }
    )));
    let result = &outcome.history[2].tool_results[0];
    assert_eq!(result.error_kind, Some(ToolErrorKind::Timeout));
    assert!(result.payload.starts_with("timeout"));
    assert!(matches!(
        &provider.requests()[1].messages[2].content[0],
        MessageContent::ToolResult { is_error: Some(true), .. }
    ));
}

#[tokio::test]
async fn test_backend_failure_does_not_stop_the_round() {
    let mut registry = chatloop_tools::ToolRegistry::from_descriptors(vec![get_time_tool()]);
    registry.register(chatloop_core::ToolDescriptor::new("broken", "Always fails", json!({})));
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::default()
            .with_tool_call("call_1", "broken", json!({}))
            .with_tool_call("call_2", "get_time", json!({})),
        ScriptedTurn::text("One of them worked."),
    ]));
    let backend = backend();
    let orchestrator = chatloop::Orchestrator::new(
        provider.clone(),
        Arc::new(registry),
        backend.clone(),
        OrchestratorConfig::default(),
    );

    let (outcome, _) = run(&orchestrator, TurnRequest::new("t1", "go")).await;

    assert!(outcome.is_completed());
    assert_eq!(backend.calls(), vec!["broken", "get_time"]);
    let results = &outcome.history[2].tool_results;
    assert_eq!(results[0].error_kind, Some(ToolErrorKind::Backend));
    assert_eq!(results[1].status, ToolCallStatus::Ok);
}

// ============================================================================
// Scenario E: round limit
// ============================================================================

#[tokio::test]
async fn test_round_limit_stops_at_max_rounds() {
    let turns = (1..=37)
        .map(|i| {
            ScriptedTurn::text(format!("Searching, step {}.", i)).with_tool_call(
                format!("call_{}", i),
                "search",
                json!({"q": format!("page {}", i)}),
            )
        })
        .collect();
    let provider = Arc::new(ScriptedProvider::new(turns));
    let backend = backend();
    let orchestrator = orchestrator(&provider, &backend, OrchestratorConfig::default());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "search everything")).await;

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert_eq!(outcome.rounds, 10);
    assert_eq!(backend.call_count(), 10);
    assert_eq!(provider.remaining(), 26);
    assert_eq!(count_requested(&events), 10);
    assert_eq!(count_resolved(&events), 10);
    assert_eq!(outcome.error.as_ref().map(|e| e.code()), Some("round_limit_exceeded"));

    match events.last() {
        Some(CanonicalEvent::Error {
            code,
            call_id,
            tool_name,
            ..
        }) => {
            assert_eq!(code.as_deref(), Some("round_limit_exceeded"));
            assert_eq!(call_id.as_deref(), Some("call_11"));
            assert_eq!(tool_name.as_deref(), Some("search"));
        }
        other => panic!("expected a terminal error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_rounds_completes_after_first_response() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text("I would check the time.").with_tool_call("call_1", "get_time", json!({})),
        ScriptedTurn::text("never requested"),
    ]));
    let backend = backend();
    let config = OrchestratorConfig {
        max_rounds_per_turn: 0,
        ..Default::default()
    };
    let orchestrator = orchestrator(&provider, &backend, config);

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "time?")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.rounds, 0);
    assert_eq!(outcome.final_text, "I would check the time.");
    assert_eq!(backend.call_count(), 0);
    assert_eq!(count_requested(&events), 0);
    assert_eq!(provider.remaining(), 1);
}

// ============================================================================
// Unknown tools and the session budget
// ============================================================================

#[tokio::test]
async fn test_unknown_native_tool_is_annotated_not_replayed() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::default()
            .with_tool_call("call_1", "launch_rockets", json!({}))
            .with_tool_call("call_2", "get_time", json!({})),
        ScriptedTurn::text("It is noon."),
    ]));
    let backend = backend();
    let orchestrator = orchestrator(&provider, &backend, OrchestratorConfig::default());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "go")).await;

    assert!(outcome.is_completed());
    assert!(events.iter().any(|e| matches!(
        e,
        CanonicalEvent::ToolCallResolved { call_id, error_kind: Some(ToolErrorKind::NotFound), .. } if call_id == "call_1"
    )));
    assert_eq!(backend.calls(), vec!["get_time"]);

    let replay = &provider.requests()[1];
    let tool_uses = replay.messages[1]
        .content
        .iter()
        .filter(|c| matches!(c, MessageContent::ToolUse { .. }))
        .count();
    assert_eq!(tool_uses, 1);
    assert_eq!(outcome.history[2].tool_results.len(), 1);
}

#[tokio::test]
async fn test_only_unknown_tools_completes_without_replay() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text("Launching.").with_tool_call("call_1", "launch_rockets", json!({})),
        ScriptedTurn::text("unused"),
    ]));
    let orchestrator = orchestrator(&provider, &backend(), OrchestratorConfig::default());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "go")).await;

    assert!(outcome.is_completed());
    assert_eq!(provider.remaining(), 1);
    assert_eq!(count_requested(&events), count_resolved(&events));
    assert!(matches!(events.last(), Some(CanonicalEvent::Done { .. })));
}

#[tokio::test]
async fn test_session_budget_refuses_and_resets() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::default()
            .with_tool_call("call_1", "get_time", json!({}))
            .with_tool_call("call_2", "get_time", json!({})),
        ScriptedTurn::text("Only one ran."),
        ScriptedTurn::default().with_tool_call("call_3", "get_time", json!({})),
        ScriptedTurn::text("After reset."),
    ]));
    let backend = backend();
    let config = OrchestratorConfig {
        max_tool_calls_per_session: 1,
        ..Default::default()
    };
    let orchestrator = orchestrator(&provider, &backend, config);

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "twice")).await;
    assert!(outcome.is_completed());
    assert_eq!(backend.call_count(), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        CanonicalEvent::ToolCallResolved { call_id, error_kind: Some(ToolErrorKind::BudgetExhausted), .. } if call_id == "call_2"
    )));

    orchestrator.tracker().reset_budget();
    let (outcome, _) = run(&orchestrator, TurnRequest::new("t1", "again")).await;
    assert!(outcome.is_completed());
    assert_eq!(backend.call_count(), 2);
}

// ============================================================================
// Transport errors
// ============================================================================

#[tokio::test]
async fn test_transport_error_is_terminal() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::failing(LlmError::ServerError {
        message: "upstream overloaded".into(),
        status: Some(529),
    })]));
    let orchestrator = orchestrator(&provider, &backend(), OrchestratorConfig::default());

    let (outcome, events) = run(&orchestrator, TurnRequest::new("t1", "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        CanonicalEvent::Error { code: Some(code), message, .. }
            if code == "transport" && message.contains("upstream overloaded")
    ));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_while_streaming() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::hanging(vec!["partial".into()])]));
    let store = Arc::new(InMemoryConversationStore::new());
    let orchestrator =
        orchestrator(&provider, &backend(), OrchestratorConfig::default()).with_store(store.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let (outcome, events) = run_with_cancel(&orchestrator, TurnRequest::new("t1", "hi"), cancel).await;

    assert_eq!(outcome.status, TurnStatus::Cancelled);
    assert_eq!(events, vec![CanonicalEvent::text("partial")]);
    assert!(store.load_messages("t1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_while_tool_runs_discards_result() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text("Working.").with_tool_call("call_1", "slow", json!({})),
        ScriptedTurn::text("never reached"),
    ]));
    let backend = backend();
    let orchestrator = orchestrator(&provider, &backend, OrchestratorConfig::default());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let (outcome, events) = run_with_cancel(&orchestrator, TurnRequest::new("t1", "go"), cancel).await;

    assert_eq!(outcome.status, TurnStatus::Cancelled);
    assert_eq!(count_requested(&events), 1);
    assert_eq!(count_resolved(&events), 0);
    assert!(!events.iter().any(|e| e.is_terminal()));
    // Only the user message; nothing from the cancelled round.
    assert_eq!(outcome.history.len(), 1);
    assert_eq!(provider.remaining(), 1);

    // The tool was already running and finishes in the background.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(backend.calls(), vec!["slow"]);
}

// ============================================================================
// Task tracking and persistence
// ============================================================================

#[tokio::test]
async fn test_agent_tasks_follow_tool_calls() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::default()
            .with_tool_call("call_1", "get_time", json!({}))
            .with_tool_call("call_2", "search", json!({"q": 1})),
        ScriptedTurn::text("done"),
    ]));
    let config = OrchestratorConfig {
        agent_tracking: true,
        ..Default::default()
    };
    let orchestrator = orchestrator(&provider, &backend(), config);
    let mut snapshots = orchestrator.tracker().subscribe();

    let (outcome, _) = run(&orchestrator, TurnRequest::new("t1", "go")).await;

    let tasks = orchestrator.tracker().tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].status, AgentTaskStatus::Completed);
    assert_eq!(tasks[1].status, AgentTaskStatus::Error);
    assert_eq!(tasks[0].related_message_id, outcome.history[1].id);
    assert_eq!(tasks[0].title, "get_time");

    let first = snapshots.recv().await.unwrap();
    assert_eq!(first[0].status, AgentTaskStatus::Pending);

    orchestrator.tracker().clear_tasks();
    assert!(orchestrator.tracker().tasks().is_empty());
}

#[tokio::test]
async fn test_concurrent_turns_track_their_own_tasks() {
    let call = r#"Working. {"tool": "slow", "arguments": {}}"#;
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text(call),
        ScriptedTurn::text(call),
        ScriptedTurn::text("done"),
        ScriptedTurn::text("done"),
    ]));
    let config = OrchestratorConfig {
        agent_tracking: true,
        ..prompt_mode()
    };
    let orchestrator = orchestrator(&provider, &backend(), config);

    let ((first, _), (second, _)) = tokio::join!(
        run(&orchestrator, TurnRequest::new("a", "go")),
        run(&orchestrator, TurnRequest::new("b", "go")),
    );

    assert!(first.is_completed());
    assert!(second.is_completed());
    let tasks = orchestrator.tracker().tasks();
    assert_eq!(tasks.len(), 2);
    // Both turns produce the same inline call id.
    assert!(tasks.iter().all(|t| t.call_id == "call_r1_1"));
    assert!(tasks.iter().all(|t| t.status == AgentTaskStatus::Completed));
    assert_ne!(tasks[0].related_message_id, tasks[1].related_message_id);
}

#[tokio::test]
async fn test_completed_turns_are_persisted_and_reloaded() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text("Hi there."),
        ScriptedTurn::text("Still here."),
    ]));
    let store = Arc::new(InMemoryConversationStore::new());
    let orchestrator =
        orchestrator(&provider, &backend(), OrchestratorConfig::default()).with_store(store.clone());

    run(&orchestrator, TurnRequest::new("topic", "hello")).await;
    assert_eq!(store.load_messages("topic").await.unwrap().len(), 2);

    let (outcome, _) = run(&orchestrator, TurnRequest::new("topic", "you there?")).await;
    assert_eq!(outcome.history.len(), 2);
    assert_eq!(store.load_messages("topic").await.unwrap().len(), 4);

    let second = &provider.requests()[1];
    let texts: Vec<String> = second.messages.iter().map(|m| m.text_content()).collect();
    assert_eq!(texts, vec!["hello", "Hi there.", "you there?"]);
}

#[tokio::test]
async fn test_concurrent_turns_are_independent() {
    let provider_a = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text("a").with_chunk_delay(Duration::from_millis(10)),
    ]));
    let provider_b = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::text("b").with_chunk_delay(Duration::from_millis(10)),
    ]));
    let backend = backend();
    let a = orchestrator(&provider_a, &backend, OrchestratorConfig::default());
    let b = orchestrator(&provider_b, &backend, OrchestratorConfig::default());

    let cancel_b = CancellationToken::new();
    cancel_b.cancel();
    let ((outcome_a, _), (outcome_b, events_b)) = tokio::join!(
        run(&a, TurnRequest::new("a", "go")),
        run_with_cancel(&b, TurnRequest::new("b", "go"), cancel_b),
    );

    assert_eq!(outcome_a.final_text, "a");
    assert_eq!(outcome_b.status, TurnStatus::Cancelled);
    assert!(events_b.is_empty());
}
