//! Inline Reasoning Tags
//!
//! Some models (DeepSeek R1, QwQ, local Ollama models) stream their reasoning
//! inline wrapped in `<think>...</think>` or `<thinking>...</thinking>`. A tag
//! can be split across deltas (`"<thi"` then `"nk>"`), so the splitter keeps a
//! bounded lookback buffer holding at most one possible partial tag.

const OPEN_TAGS: [&str; 2] = ["<think>", "<thinking>"];
const CLOSE_TAGS: [&str; 2] = ["</think>", "</thinking>"];

/// A classified piece of streamed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThinkSegment {
    Answer(String),
    Reasoning(String),
}

/// Incremental splitter for inline reasoning tags.
#[derive(Debug, Default)]
pub struct ThinkTagSplitter {
    buffer: String,
    in_thinking: bool,
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the text seen so far ends inside a reasoning block.
    pub fn is_thinking(&self) -> bool {
        self.in_thinking
    }

    /// Longest suffix kept back while waiting for the next delta.
    pub fn max_lookback() -> usize {
        OPEN_TAGS
            .iter()
            .chain(CLOSE_TAGS.iter())
            .map(|t| t.len())
            .max()
            .unwrap_or(0)
            .saturating_sub(1)
    }

    /// Feed one delta; returns the segments that can be classified now.
    pub fn push(&mut self, chunk: &str) -> Vec<ThinkSegment> {
        self.buffer.push_str(chunk);
        let mut segments = Vec::new();

        loop {
            let tags: &[&str] = if self.in_thinking { &CLOSE_TAGS } else { &OPEN_TAGS };

            if let Some((pos, tag_len)) = find_earliest(&self.buffer, tags) {
                let before: String = self.buffer[..pos].to_string();
                self.emit(&mut segments, before);
                self.buffer.drain(..pos + tag_len);
                self.in_thinking = !self.in_thinking;
                continue;
            }

            let keep = partial_tag_suffix(&self.buffer, tags);
            let split_at = self.buffer.len() - keep;
            let ready: String = self.buffer[..split_at].to_string();
            self.buffer.drain(..split_at);
            self.emit(&mut segments, ready);
            break;
        }

        segments
    }

    /// Flush the lookback buffer at stream end. An unterminated reasoning
    /// block is treated as implicitly closed.
    pub fn flush(&mut self) -> Vec<ThinkSegment> {
        let mut segments = Vec::new();
        let rest = std::mem::take(&mut self.buffer);
        self.emit(&mut segments, rest);
        self.in_thinking = false;
        segments
    }

    fn emit(&self, segments: &mut Vec<ThinkSegment>, text: String) {
        if text.is_empty() {
            return;
        }
        if self.in_thinking {
            segments.push(ThinkSegment::Reasoning(text));
        } else {
            segments.push(ThinkSegment::Answer(text));
        }
    }
}

fn find_earliest(haystack: &str, tags: &[&str]) -> Option<(usize, usize)> {
    tags.iter()
        .filter_map(|tag| haystack.find(tag).map(|pos| (pos, tag.len())))
        .min_by_key(|(pos, _)| *pos)
}

/// Length of the longest suffix of `text` that is a proper prefix of a tag.
fn partial_tag_suffix(text: &str, tags: &[&str]) -> usize {
    let longest = tags.iter().map(|t| t.len()).max().unwrap_or(0);
    let upper = longest.saturating_sub(1).min(text.len());
    (1..=upper)
        .rev()
        .find(|&k| {
            let start = text.len() - k;
            text.is_char_boundary(start) && tags.iter().any(|t| t.starts_with(&text[start..]))
        })
        .unwrap_or(0)
}
