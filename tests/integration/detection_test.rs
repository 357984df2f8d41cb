//! Inline Detection and Layout Tests
//!
//! Detection across every supported markup, then layout of the detected
//! text with tool status blocks.

use chatloop_core::{SourceFormat, ToolCallResult, ToolErrorKind};
use chatloop_tools::{
    detect_tool_calls, find_markers, layout_segments, strip_markers, IntentPhrasePlacement,
    Segment, TrailingPlacement,
};
use serde_json::json;

use crate::support::*;

fn tools() -> Vec<chatloop_core::ToolDescriptor> {
    vec![get_time_tool(), search_tool()]
}

#[test]
fn test_mixed_syntaxes_in_one_response() {
    let text = "First <tool_use><name>get_time</name><arguments>{}</arguments></tool_use>\n\
                then <tool_call>{\"tool\": \"search\", \"arguments\": {\"q\": \"a\"}}</tool_call>\n\
                and\n```tool_call\n{\"tool\": \"search\", \"arguments\": {\"q\": \"b\"}}\n```\n\
                finally {\"name\": \"search\", \"arguments\": \"{\\\"q\\\": \\\"c\\\"}\"} done";

    let detection = detect_tool_calls(text, &tools(), "call_r1");

    let names: Vec<&str> = detection.requests.iter().map(|r| r.tool_name.as_str()).collect();
    assert_eq!(names, vec!["get_time", "search", "search", "search"]);
    let ids: Vec<&str> = detection.requests.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["call_r1_1", "call_r1_2", "call_r1_3", "call_r1_4"]);
    assert_eq!(detection.requests[1].arguments, json!({"q": "a"}));
    assert_eq!(detection.requests[2].arguments, json!({"q": "b"}));
    // Stringified arguments are decoded.
    assert_eq!(detection.requests[3].arguments, json!({"q": "c"}));
    assert!(detection
        .requests
        .iter()
        .all(|r| r.source_format == SourceFormat::InlineMarkup && r.raw_span.is_some()));

    assert_eq!(find_markers(&detection.text).len(), 4);
    assert!(!detection.text.contains("<tool_use>"));
    assert!(!detection.text.contains("```"));
    assert!(detection.text.ends_with(" done"));
}

#[test]
fn test_raw_spans_point_into_the_original_text() {
    let text = r#"Checking. {"tool": "get_time"} ok"#;
    let detection = detect_tool_calls(text, &tools(), "c");

    let span = detection.requests[0].raw_span.as_ref().unwrap();
    assert_eq!(&text[span.start..span.end], r#"{"tool": "get_time"}"#);
    assert_eq!(detection.requests[0].arguments, json!({}));
    assert_eq!(detection.text, "Checking. [[tool_call:c_1]] ok");
}

#[test]
fn test_detection_is_deterministic_and_idempotent() {
    let text = r#"Look: <tool_call>{"tool": "search", "arguments": {"q": "x"}}</tool_call>"#;

    let first = detect_tool_calls(text, &tools(), "call_r2");
    let second = detect_tool_calls(text, &tools(), "call_r2");
    assert_eq!(first, second);

    // Markers are not calls.
    let again = detect_tool_calls(&first.text, &tools(), "call_r2");
    assert!(!again.has_calls());
    assert_eq!(again.text, first.text);
}

#[test]
fn test_unknown_tools_are_demoted_to_text() {
    let text = r#"Try {"tool": "rm_rf", "arguments": {}} or {"tool": "get_time"}"#;
    let detection = detect_tool_calls(text, &tools(), "c");

    assert_eq!(detection.requests.len(), 1);
    assert_eq!(detection.requests[0].call_id, "c_1");
    assert_eq!(detection.demoted.len(), 1);
    assert!(detection.demoted[0].text.contains("rm_rf"));
    assert!(detection.text.starts_with(r#"Try {"tool": "rm_rf", "arguments": {}} or "#));
}

#[test]
fn test_ordinary_json_is_left_alone() {
    let text = "Config:\n```json\n{\"name\": \"demo\", \"version\": 2}\n```\nand {\"a\": {\"b\": \"}\"}}";
    let detection = detect_tool_calls(text, &tools(), "c");

    assert!(!detection.has_calls());
    assert!(detection.demoted.is_empty());
    assert_eq!(detection.text, text);
}

#[test]
fn test_layout_with_markers_and_results() {
    let text = r#"A {"tool": "get_time"} B {"tool": "search", "arguments": {"q": "z"}} C"#;
    let detection = detect_tool_calls(text, &tools(), "c");
    let results = vec![
        ToolCallResult::ok("c_1", "get_time", "12:00"),
        ToolCallResult::ok("c_2", "search", "nothing"),
    ];

    let segments = layout_segments(&detection.text, &detection.requests, &results, &TrailingPlacement);

    assert_eq!(segments.len(), 5);
    assert_eq!(segments[0], Segment::Text("A ".into()));
    assert!(matches!(&segments[1], Segment::ToolStatus(r) if r.call_id == "c_1"));
    assert_eq!(segments[2], Segment::Text(" B ".into()));
    assert!(matches!(&segments[3], Segment::ToolStatus(r) if r.call_id == "c_2"));
    assert_eq!(segments[4], Segment::Text(" C".into()));
}

#[test]
fn test_layout_marker_without_result_restores_markup() {
    let text = r#"A {"tool": "get_time"} B"#;
    let detection = detect_tool_calls(text, &tools(), "c");

    let segments = layout_segments(&detection.text, &detection.requests, &[], &TrailingPlacement);

    assert_eq!(segments, vec![Segment::Text(text.to_string())]);
}

#[test]
fn test_layout_excess_results_are_appended() {
    let text = r#"A {"tool": "get_time"} B"#;
    let detection = detect_tool_calls(text, &tools(), "c");
    let results = vec![
        ToolCallResult::ok("c_1", "get_time", "12:00"),
        ToolCallResult::error("n_1", "other", ToolErrorKind::NotFound, "unknown tool"),
    ];

    let segments = layout_segments(&detection.text, &detection.requests, &results, &TrailingPlacement);

    assert_eq!(segments.len(), 4);
    assert!(matches!(&segments[3], Segment::ToolStatus(r) if r.call_id == "n_1"));
}

#[test]
fn test_layout_without_markers_uses_strategy() {
    let text = "I'll check the time now. Back shortly.";
    let results = vec![ToolCallResult::ok("call_1", "get_time", "12:00")];

    let trailing = layout_segments(text, &[], &results, &TrailingPlacement);
    assert_eq!(trailing[0], Segment::Text(text.to_string()));
    assert!(matches!(trailing[1], Segment::ToolStatus(_)));

    let intent = layout_segments(text, &[], &results, &IntentPhrasePlacement::default());
    assert_eq!(intent[0], Segment::Text("I'll check the time now.".into()));
    assert!(matches!(intent[1], Segment::ToolStatus(_)));
    assert_eq!(intent[2], Segment::Text(" Back shortly.".into()));
}

#[test]
fn test_strip_markers_for_replay() {
    let text = r#"Sure. {"tool": "get_time"}"#;
    let detection = detect_tool_calls(text, &tools(), "c");
    assert_eq!(strip_markers(&detection.text), "Sure.");
}
