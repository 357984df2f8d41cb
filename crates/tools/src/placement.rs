//! Status Block Placement
//!
//! Turns answer text plus resolved tool calls into an ordered list of
//! segments for a renderer. Inline calls carry `[[tool_call:<id>]]` markers
//! and their status blocks go exactly there. Native calls have no position in
//! the prose, so a [`PlacementStrategy`] picks one. Placement is cosmetic; no
//! result is ever dropped by it.

use std::collections::HashSet;

use chatloop_core::{ToolCallRequest, ToolCallResult};

use crate::detection::find_markers;

/// One piece of laid-out output.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    ToolStatus(ToolCallResult),
}

/// Picks the byte offset at which status blocks for marker-less calls go.
pub trait PlacementStrategy: Send + Sync {
    fn insertion_point(&self, text: &str) -> usize;
}

/// Status blocks after the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingPlacement;

impl PlacementStrategy for TrailingPlacement {
    fn insertion_point(&self, text: &str) -> usize {
        text.len()
    }
}

/// Status blocks after the sentence announcing the tool use
/// ("Let me check the weather."), or trailing when no phrase is found.
#[derive(Debug, Clone)]
pub struct IntentPhrasePlacement {
    phrases: Vec<String>,
}

impl Default for IntentPhrasePlacement {
    fn default() -> Self {
        Self::new([
            "let me check",
            "let me look",
            "let me search",
            "let me find",
            "i'll check",
            "i will check",
            "i'll look up",
        ])
    }
}

impl IntentPhrasePlacement {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases.into_iter().map(|p| p.into().to_ascii_lowercase()).collect(),
        }
    }
}

impl PlacementStrategy for IntentPhrasePlacement {
    fn insertion_point(&self, text: &str) -> usize {
        // ASCII lowercasing keeps byte offsets aligned with `text`.
        let lower = text.to_ascii_lowercase();
        let phrase_end = self
            .phrases
            .iter()
            .filter_map(|p| lower.find(p.as_str()).map(|i| i + p.len()))
            .min();
        let Some(from) = phrase_end else {
            return text.len();
        };
        text[from..]
            .char_indices()
            .find(|(_, c)| matches!(c, '.' | '!' | '?' | ':' | '\n'))
            .map(|(i, c)| from + i + c.len_utf8())
            .unwrap_or(text.len())
    }
}

/// Lay out `text` with the status blocks of `results`.
///
/// - a marker with a matching result becomes that result's status block
/// - a marker with no result goes back to the raw markup it replaced
/// - results with no marker are appended after the last segment, or placed
///   by `strategy` when the text has no markers at all
pub fn layout_segments(
    text: &str,
    requests: &[ToolCallRequest],
    results: &[ToolCallResult],
    strategy: &dyn PlacementStrategy,
) -> Vec<Segment> {
    let markers = find_markers(text);
    let mut segments = Vec::new();
    let mut used: HashSet<&str> = HashSet::new();

    if markers.is_empty() {
        let mut at = strategy.insertion_point(text).min(text.len());
        while !text.is_char_boundary(at) {
            at += 1;
        }
        push_text(&mut segments, &text[..at]);
        segments.extend(results.iter().cloned().map(Segment::ToolStatus));
        push_text(&mut segments, &text[at..]);
        return segments;
    }

    let mut cursor = 0;
    for (call_id, range) in markers {
        push_text(&mut segments, &text[cursor..range.start]);
        cursor = range.end;

        match results.iter().find(|r| r.call_id == call_id && !used.contains(r.call_id.as_str())) {
            Some(result) => {
                used.insert(result.call_id.as_str());
                segments.push(Segment::ToolStatus(result.clone()));
            }
            None => {
                let raw = requests
                    .iter()
                    .find(|r| r.call_id == call_id)
                    .and_then(|r| r.raw_span.as_ref())
                    .map(|span| span.text.as_str())
                    .unwrap_or("");
                push_text(&mut segments, raw);
            }
        }
    }
    push_text(&mut segments, &text[cursor..]);

    segments.extend(
        results
            .iter()
            .filter(|r| !used.contains(r.call_id.as_str()))
            .cloned()
            .map(Segment::ToolStatus),
    );
    segments
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}
