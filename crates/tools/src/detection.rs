//! Inline Tool-Call Detection
//!
//! Models without native function calling (or running in prompt mode) write
//! their tool calls into the answer text. This module finds those calls in
//! the accumulated text of a round and swaps each one for a
//! `[[tool_call:<id>]]` marker so the renderer can put a status block back
//! where the call was written.
//!
//! Recognized syntaxes:
//! - `<tool_use><name>N</name><arguments>{..}</arguments></tool_use>`
//! - `<tool_call>{"tool": N, "arguments": {..}}</tool_call>`
//! - fenced blocks labeled `tool_call`, `tool_use` or `json`
//! - bare JSON objects with a `tool` key (or `name` plus `arguments`)

use std::collections::HashSet;
use std::sync::LazyLock;

use chatloop_core::{RawSpan, SourceFormat, ToolCallRequest, ToolDescriptor};
use regex::Regex;
use serde_json::{Map, Value};

static TOOL_USE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_use>\s*<name>\s*([^<]+?)\s*</name>\s*<arguments>(.*?)</arguments>\s*</tool_use>")
        .expect("valid tool_use pattern")
});

static TOOL_CALL_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>(.*?)</tool_call>")
        .expect("valid tool_call pattern")
});

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:tool_call|tool_use|json)[ \t]*\r?\n(.*?)```")
        .expect("valid fence pattern")
});

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[tool_call:([A-Za-z0-9_\-]+)\]\]")
        .expect("valid marker pattern")
});

/// Longest bare JSON object considered as a call. Tagged and fenced calls
/// have explicit delimiters and no such limit.
pub const MAX_BARE_CALL_LEN: usize = 64 * 1024;

/// Placeholder left in the text where a call was excised.
pub fn marker(call_id: &str) -> String {
    format!("[[tool_call:{}]]", call_id)
}

/// Result of scanning one round of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Input text with each accepted call replaced by its marker
    pub text: String,
    /// Accepted calls in text order
    pub requests: Vec<ToolCallRequest>,
    /// Matches naming unknown tools, left in the text verbatim
    pub demoted: Vec<RawSpan>,
}

impl Detection {
    pub fn has_calls(&self) -> bool {
        !self.requests.is_empty()
    }
}

#[derive(Debug)]
struct Candidate {
    start: usize,
    end: usize,
    name: String,
    arguments: Value,
}

/// Scan `text` for inline tool calls against the known descriptor set.
///
/// Call ids are `{id_prefix}_{n}` with `n` counting accepted calls from 1,
/// so the same text and descriptors always produce the same result.
pub fn detect_tool_calls(text: &str, descriptors: &[ToolDescriptor], id_prefix: &str) -> Detection {
    let known: HashSet<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();

    let mut candidates = Vec::new();
    collect_tool_use_tags(text, &mut candidates);
    collect_tool_call_tags(text, &mut candidates);
    collect_fenced_blocks(text, &mut candidates);
    collect_bare_json(text, &mut candidates);

    // Earliest start wins; on a tie the longer match wins.
    candidates.sort_by(|a, b| a.start.cmp(&b.start).then((b.end - b.start).cmp(&(a.end - a.start))));

    let mut out = String::with_capacity(text.len());
    let mut requests = Vec::new();
    let mut demoted = Vec::new();
    let mut cursor = 0;

    for candidate in candidates {
        if candidate.start < cursor {
            continue;
        }
        let span = RawSpan {
            start: candidate.start,
            end: candidate.end,
            text: text[candidate.start..candidate.end].to_string(),
        };
        out.push_str(&text[cursor..candidate.start]);
        cursor = candidate.end;

        if !known.contains(candidate.name.as_str()) {
            tracing::warn!(
                tool = %candidate.name,
                start = span.start,
                "inline tool call names an unknown tool; leaving it as text"
            );
            out.push_str(&span.text);
            demoted.push(span);
            continue;
        }

        let call_id = format!("{}_{}", id_prefix, requests.len() + 1);
        out.push_str(&marker(&call_id));
        requests.push(ToolCallRequest {
            call_id,
            tool_name: candidate.name,
            arguments: candidate.arguments,
            source_format: SourceFormat::InlineMarkup,
            raw_span: Some(span),
        });
    }
    out.push_str(&text[cursor..]);

    Detection {
        text: out,
        requests,
        demoted,
    }
}

fn collect_tool_use_tags(text: &str, out: &mut Vec<Candidate>) {
    for caps in TOOL_USE_RE.captures_iter(text) {
        let (Some(whole), Some(name), Some(args)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            name: name.as_str().to_string(),
            arguments: parse_arguments_text(args.as_str()),
        });
    }
}

fn collect_tool_call_tags(text: &str, out: &mut Vec<Candidate>) {
    for caps in TOOL_CALL_TAG_RE.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some((name, arguments)) = parse_call_object(body.as_str()) {
            out.push(Candidate {
                start: whole.start(),
                end: whole.end(),
                name,
                arguments,
            });
        }
    }
}

fn collect_fenced_blocks(text: &str, out: &mut Vec<Candidate>) {
    for caps in FENCE_RE.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        // A `json` fence that is not a call object is just code.
        if let Some((name, arguments)) = parse_call_object(body.as_str()) {
            out.push(Candidate {
                start: whole.start(),
                end: whole.end(),
                name,
                arguments,
            });
        }
    }
}

fn collect_bare_json(text: &str, out: &mut Vec<Candidate>) {
    let bytes = text.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] != b'{' {
            pos += 1;
            continue;
        }
        match balanced_object_end(text, pos) {
            Some(end) => match parse_call_object(&text[pos..end]) {
                Some((name, arguments)) => {
                    out.push(Candidate {
                        start: pos,
                        end,
                        name,
                        arguments,
                    });
                    pos = end;
                }
                None => pos += 1,
            },
            None => pos += 1,
        }
    }
}

/// Byte offset just past the `}` closing the object opened at `start`.
/// Braces inside JSON strings are ignored. Objects longer than
/// [`MAX_BARE_CALL_LEN`] are not considered, which keeps a response full of
/// unclosed braces linear in its length.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().take(MAX_BARE_CALL_LEN).enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Read `{"tool": N, "arguments": {..}}` (or `"name"` in place of `"tool"`).
///
/// A `name` key alone is too common in ordinary JSON, so it only counts when
/// `arguments` is present as well.
fn parse_call_object(body: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    let obj = value.as_object()?;

    let name = match (obj.get("tool"), obj.get("name"), obj.get("arguments")) {
        (Some(Value::String(tool)), _, _) => tool,
        (None, Some(Value::String(name)), Some(_)) => name,
        _ => return None,
    };
    if name.trim().is_empty() {
        return None;
    }

    let arguments = match obj.get("arguments") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::String(raw)) => parse_arguments_text(raw),
        Some(other) => other.clone(),
    };
    Some((name.trim().to_string(), arguments))
}

/// Arguments written as text. Undecodable text is kept as a string so the
/// schema check can report it.
fn parse_arguments_text(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Call ids of every marker in `text`, in order, with their byte ranges.
pub fn find_markers(text: &str) -> Vec<(String, std::ops::Range<usize>)> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let id = caps.get(1)?;
            Some((id.as_str().to_string(), whole.range()))
        })
        .collect()
}

/// Remove all markers, used when the assistant turn is replayed to the model.
pub fn strip_markers(text: &str) -> String {
    let stripped = MARKER_RE.replace_all(text, "");
    stripped.trim().to_string()
}

/// Instruction block appended to the system prompt in prompt mode.
pub fn build_tool_use_instructions(descriptors: &[ToolDescriptor]) -> String {
    let mut tools = String::new();
    for tool in descriptors {
        tools.push_str(&format!("### {}\n{}\n", tool.name, tool.description));

        let required: Vec<&str> = tool
            .argument_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(properties) = tool.argument_schema.get("properties").and_then(Value::as_object) {
            if !properties.is_empty() {
                tools.push_str("Parameters:\n");
                for (name, schema) in properties {
                    let ty = schema.get("type").and_then(Value::as_str).unwrap_or("any");
                    let req = if required.contains(&name.as_str()) {
                        "required"
                    } else {
                        "optional"
                    };
                    let desc = schema.get("description").and_then(Value::as_str).unwrap_or("");
                    tools.push_str(&format!("  - `{}` ({}, {}): {}\n", name, ty, req, desc));
                }
            }
        }
        tools.push('\n');
    }

    format!(
        r#"## Tool Calling

You can call the tools listed below. To call one, output a block in exactly this format:

```tool_call
{{"tool": "ToolName", "arguments": {{"param": "value"}}}}
```

Rules:
- The JSON must be valid.
- You may emit several tool_call blocks in one response.
- After emitting tool calls, stop and wait for the results. Never invent a tool result.
- Only call tools from this list.

## Available Tools

{tools}When you receive a tool result, decide whether to call more tools or give your final answer."#
    )
}

/// Render a tool result for prompt-mode replay.
pub fn format_tool_result(tool_name: &str, call_id: &str, payload: &str, is_error: bool) -> String {
    if is_error {
        format!("[Tool Error: {} (id: {})]\n{}", tool_name, call_id, payload)
    } else {
        format!("[Tool Result: {} (id: {})]\n{}", tool_name, call_id, payload)
    }
}
