//! Loop State
//!
//! Transient, per-turn bookkeeping owned by exactly one running turn.

use std::time::{Duration, Instant};

use chatloop_core::ToolCallRequest;
use chatloop_llm::UsageStats;
use serde::{Deserialize, Serialize};

/// Where the loop is in the round cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Streaming,
    DetectingCalls,
    Invoking,
    Replaying,
    Completed,
    Cancelled,
    Failed,
}

impl LoopPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopPhase::Completed | LoopPhase::Cancelled | LoopPhase::Failed)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Latency measured from the start of the turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLatency {
    /// First delta of any kind
    pub first_token_ms: Option<u64>,
    /// First answer (non-reasoning) delta
    pub first_answer_token_ms: Option<u64>,
    pub total_ms: u64,
}

#[derive(Debug)]
pub struct LoopState {
    /// Tool rounds executed so far
    pub round_index: u32,
    pub max_rounds: u32,
    /// Model responses requested so far
    pub response_index: u32,
    pub accumulated_text: String,
    pub accumulated_reasoning: String,
    pub pending_tool_calls: Vec<ToolCallRequest>,
    pub is_thinking: bool,
    pub phase: LoopPhase,
    pub usage: UsageStats,
    started: Instant,
    first_token_latency: Option<Duration>,
    first_answer_token_latency: Option<Duration>,
}

impl LoopState {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            round_index: 0,
            max_rounds,
            response_index: 0,
            accumulated_text: String::new(),
            accumulated_reasoning: String::new(),
            pending_tool_calls: Vec::new(),
            is_thinking: false,
            phase: LoopPhase::Idle,
            usage: UsageStats::default(),
            started: Instant::now(),
            first_token_latency: None,
            first_answer_token_latency: None,
        }
    }

    pub fn transition(&mut self, phase: LoopPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, round = self.round_index, "loop transition");
        self.phase = phase;
    }

    /// Reset the per-response buffers before streaming the next response.
    pub fn begin_response(&mut self) {
        self.response_index += 1;
        self.accumulated_text.clear();
        self.accumulated_reasoning.clear();
        self.pending_tool_calls.clear();
        self.is_thinking = false;
        self.transition(LoopPhase::Streaming);
    }

    pub fn record_answer(&mut self, text: &str) {
        self.mark_first_token();
        if self.first_answer_token_latency.is_none() && !text.is_empty() {
            self.first_answer_token_latency = Some(self.started.elapsed());
        }
        self.accumulated_text.push_str(text);
    }

    pub fn record_reasoning(&mut self, text: &str) {
        self.mark_first_token();
        self.accumulated_reasoning.push_str(text);
    }

    fn mark_first_token(&mut self) {
        if self.first_token_latency.is_none() {
            self.first_token_latency = Some(self.started.elapsed());
        }
    }

    /// The round number the next tool round would get, if the limit allows it.
    pub fn next_round(&self) -> Option<u32> {
        let next = self.round_index + 1;
        (next <= self.max_rounds).then_some(next)
    }

    pub fn latency(&self) -> TurnLatency {
        TurnLatency {
            first_token_ms: self.first_token_latency.map(as_millis),
            first_answer_token_ms: self.first_answer_token_latency.map(as_millis),
            total_ms: as_millis(self.started.elapsed()),
        }
    }
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
