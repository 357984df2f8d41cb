//! Orchestrator Service
//!
//! Runs one turn at a time per call: stream a response, find the tool calls
//! in it, invoke them one by one, replay the results, and stream again until
//! the model stops asking for tools or the round limit is reached.
//!
//! Each turn owns its [`LoopState`], history, and cancellation token. The
//! registry, invoker, and task tracker are shared across turns.

use std::sync::Arc;

use chatloop_core::{
    truncate_for_log, CanonicalEvent, ThinkSegment, ThinkTagSplitter, ToolBackend,
    ToolCallRequest, ToolCallResult, ToolDescriptor, ToolErrorKind,
};
use chatloop_llm::{
    build_provider, CompletionRequest, LlmError, LlmProvider, LlmResponse, LlmResult,
    MessageContent, ProviderConfig, ToolCallingMode, UsageStats,
};
use chatloop_tools::{
    detect_tool_calls, layout_segments, PlacementStrategy, Segment, ToolInvoker, ToolRegistry,
    TrailingPlacement,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::OrchestratorConfig;
use super::error::TurnError;
use super::history::{Attachment, ConversationMessage, HistoryBuilder};
use super::sink::EventSink;
use super::state::{LoopPhase, LoopState, TurnLatency, TurnStatus};
use crate::services::agent_tasks::AgentTaskTracker;
use crate::services::collaborators::{ConversationStore, DefaultPromptBuilder, PromptBuilder};

const STREAM_CHANNEL_CAPACITY: usize = 64;
const TASK_DESCRIPTION_LIMIT: usize = 200;

/// One user message to process.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub topic_id: String,
    pub message: String,
    pub attachments: Vec<Attachment>,
    /// Prior conversation; loaded from the store when `None`
    pub history: Option<Vec<ConversationMessage>>,
    pub base_prompt: Option<String>,
}

impl TurnRequest {
    pub fn new(topic_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic_id: topic_id.into(),
            message: message.into(),
            attachments: Vec::new(),
            history: None,
            base_prompt: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_base_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = Some(prompt.into());
        self
    }
}

/// Result of a turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Tool rounds executed
    pub rounds: u32,
    /// Answer text of the last response
    pub final_text: String,
    /// Reasoning across every response of the turn
    pub reasoning: String,
    /// Messages appended during the turn, user message first
    pub history: Vec<ConversationMessage>,
    pub usage: UsageStats,
    pub latency: TurnLatency,
    /// Answer text with tool status blocks laid out for display
    pub segments: Vec<Segment>,
    pub error: Option<TurnError>,
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}

pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    invoker: Arc<ToolInvoker>,
    tracker: Arc<AgentTaskTracker>,
    prompt_builder: Arc<dyn PromptBuilder>,
    placement: Arc<dyn PlacementStrategy>,
    store: Option<Arc<dyn ConversationStore>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn ToolBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        let invoker = ToolInvoker::new(backend).with_log_limit(config.log_payload_limit);
        let prompt_builder = DefaultPromptBuilder::new()
            .with_tool_instructions(config.tool_calling_mode == ToolCallingMode::Prompt);
        Self {
            provider,
            registry,
            invoker: Arc::new(invoker),
            tracker: Arc::new(AgentTaskTracker::new(config.max_tool_calls_per_session)),
            prompt_builder: Arc::new(prompt_builder),
            placement: Arc::new(TrailingPlacement),
            store: None,
            config,
        }
    }

    /// Build the provider from its configuration, honoring `credentialRotation`.
    pub fn from_provider_config(
        provider_config: ProviderConfig,
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn ToolBackend>,
        config: OrchestratorConfig,
    ) -> LlmResult<Self> {
        let provider = build_provider(provider_config, config.rotate_credentials())?;
        Ok(Self::new(provider, registry, backend, config))
    }

    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a tracker (and so a tool-call budget) with other orchestrators.
    pub fn with_tracker(mut self, tracker: Arc<AgentTaskTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_placement(mut self, placement: Arc<dyn PlacementStrategy>) -> Self {
        self.placement = placement;
        self
    }

    pub fn tracker(&self) -> Arc<AgentTaskTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Process one user message. Events go to `events` in generation order;
    /// cancelling `cancel` stops the turn and silences the channel.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<CanonicalEvent>,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let TurnRequest {
            topic_id,
            message,
            attachments,
            history,
            base_prompt,
        } = request;

        let prior = match history {
            Some(history) => history,
            None => self.load_history(&topic_id).await,
        };
        let descriptors = self.registry.descriptors();
        let system_prompt = self.prompt_builder.build_system_prompt(
            base_prompt.as_deref(),
            &descriptors,
            &self.registry.active_servers(),
        );

        let mut turn = Turn {
            orchestrator: self,
            sink: EventSink::new(events, cancel.clone()),
            cancel,
            state: LoopState::new(self.config.max_rounds_per_turn),
            history: HistoryBuilder::new(prior),
            descriptors,
            system_prompt,
            reasoning: String::new(),
            final_text: String::new(),
            segments: Vec::new(),
        };
        turn.history
            .append(ConversationMessage::user(message).with_attachments(attachments));

        let result = turn.run().await;
        let outcome = turn.finish(result).await;

        if outcome.is_completed() {
            self.persist(&topic_id, &outcome.history).await;
        }
        tracing::info!(
            topic_id = %topic_id,
            status = ?outcome.status,
            rounds = outcome.rounds,
            input_tokens = outcome.usage.input_tokens,
            output_tokens = outcome.usage.output_tokens,
            total_ms = outcome.latency.total_ms,
            "turn finished"
        );
        outcome
    }

    async fn load_history(&self, topic_id: &str) -> Vec<ConversationMessage> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.load_messages(topic_id).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(topic_id, error = %e, "failed to load conversation; starting empty");
                Vec::new()
            }
        }
    }

    async fn persist(&self, topic_id: &str, messages: &[ConversationMessage]) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.append_messages(topic_id, messages).await {
            tracing::warn!(topic_id, error = %e, "failed to persist turn");
        }
    }
}

/// Everything one running turn owns.
struct Turn<'a> {
    orchestrator: &'a Orchestrator,
    sink: EventSink,
    cancel: CancellationToken,
    state: LoopState,
    history: HistoryBuilder,
    descriptors: Vec<ToolDescriptor>,
    system_prompt: String,
    reasoning: String,
    final_text: String,
    segments: Vec<Segment>,
}

impl Turn<'_> {
    fn config(&self) -> &OrchestratorConfig {
        &self.orchestrator.config
    }

    /// The round loop. `Ok` carries the final stop reason.
    async fn run(&mut self) -> Result<String, TurnError> {
        loop {
            self.state.begin_response();
            let response = self.stream_response().await?;
            self.state.usage.add(&response.usage);
            self.reasoning.push_str(&self.state.accumulated_reasoning);

            self.state.transition(LoopPhase::DetectingCalls);
            let assistant_id = Uuid::new_v4().to_string();
            let (display_text, requests) = self.detect_calls(&response);

            if requests.is_empty() || self.state.max_rounds == 0 {
                if !requests.is_empty() {
                    tracing::debug!(calls = requests.len(), "tool execution disabled; completing turn");
                }
                let text = if requests.is_empty() {
                    display_text
                } else {
                    self.state.accumulated_text.clone()
                };
                self.complete_with(assistant_id, text);
                return Ok(response.stop_reason.to_string());
            }

            let Some(round) = self.state.next_round() else {
                let first = &requests[0];
                tracing::warn!(
                    max_rounds = self.state.max_rounds,
                    outstanding = requests.len(),
                    "round limit reached; outstanding calls not executed"
                );
                return Err(TurnError::RoundLimitExceeded {
                    max_rounds: self.state.max_rounds,
                    call_id: Some(first.call_id.clone()),
                    tool_name: Some(first.tool_name.clone()),
                });
            };
            self.state.round_index = round;
            self.state.pending_tool_calls = requests.clone();
            tracing::debug!(round, calls = requests.len(), "starting tool round");

            let results = self.invoke_round(&requests, &assistant_id).await?;
            self.state.pending_tool_calls.clear();
            self.segments.extend(layout_segments(
                &display_text,
                &requests,
                &results,
                self.orchestrator.placement.as_ref(),
            ));

            // Nothing actually ran: replaying refusals would only loop.
            let invoked_any = results.iter().any(|r| {
                !matches!(
                    r.error_kind,
                    Some(ToolErrorKind::NotFound) | Some(ToolErrorKind::BudgetExhausted)
                )
            });
            if !invoked_any {
                tracing::debug!(round, "no call in this round was invoked; completing turn");
                self.final_text = display_text.clone();
                self.history
                    .append(ConversationMessage::assistant(display_text).with_id(assistant_id));
                return Ok(response.stop_reason.to_string());
            }

            self.state.transition(LoopPhase::Replaying);
            // Unknown tools are annotated inline only, never replayed.
            let (replay_calls, replay_results): (Vec<_>, Vec<_>) = requests
                .into_iter()
                .zip(results)
                .filter(|(_, result)| result.error_kind != Some(ToolErrorKind::NotFound))
                .unzip();
            self.history.append(
                ConversationMessage::assistant(display_text)
                    .with_id(assistant_id)
                    .with_tool_calls(replay_calls),
            );
            self.history.append(ConversationMessage::tool_results(replay_results));
        }
    }

    fn complete_with(&mut self, assistant_id: String, text: String) {
        if !text.is_empty() {
            self.segments.push(Segment::Text(text.clone()));
        }
        self.final_text = text.clone();
        self.history
            .append(ConversationMessage::assistant(text).with_id(assistant_id));
    }

    /// Stream one response, relaying deltas as they arrive.
    async fn stream_response(&mut self) -> Result<LlmResponse, TurnError> {
        let mode = self.config().tool_calling_mode;
        let mut messages = self.history.to_llm_messages(mode);
        if self.state.round_index > 0 {
            if let Some(last) = messages.last_mut() {
                last.content.push(MessageContent::Text {
                    text: self.config().continuation_instruction.clone(),
                });
            }
        }
        let request = CompletionRequest::new(messages, self.cancel.clone())
            .with_system(self.system_prompt.clone())
            .with_tools(self.descriptors.clone(), mode)
            .with_max_tokens(self.config().max_tokens);

        tracing::debug!(
            provider = self.orchestrator.provider.name(),
            response = self.state.response_index,
            round = self.state.round_index,
            messages = request.messages.len(),
            "requesting completion"
        );

        let (tx, mut rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let provider = Arc::clone(&self.orchestrator.provider);
        let mut handle = tokio::spawn(async move { provider.stream(request, tx).await });
        let cancel = self.cancel.clone();
        let mut splitter = ThinkTagSplitter::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    handle.abort();
                    return Err(TurnError::Cancelled);
                }
                event = rx.recv() => match event {
                    Some(event) => self.relay(event, &mut splitter).await,
                    None => break,
                },
            }
        }

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.abort();
                return Err(TurnError::Cancelled);
            }
            joined = &mut handle => joined,
        };
        let response = match joined {
            Ok(Ok(response)) => response,
            Ok(Err(LlmError::Cancelled)) => return Err(TurnError::Cancelled),
            Ok(Err(e)) => return Err(TurnError::Transport(e)),
            Err(e) => {
                return Err(TurnError::Transport(LlmError::Other {
                    message: format!("provider task failed: {}", e),
                }))
            }
        };

        // A provider that returned text without streaming it still gets relayed.
        if self.state.accumulated_text.is_empty() && self.state.accumulated_reasoning.is_empty() {
            if let Some(content) = response.content.as_deref().filter(|c| !c.is_empty()) {
                for segment in splitter.push(content) {
                    self.relay_segment(segment).await;
                }
            }
        }
        for segment in splitter.flush() {
            self.relay_segment(segment).await;
        }
        self.state.is_thinking = false;

        Ok(response)
    }

    async fn relay(&mut self, event: CanonicalEvent, splitter: &mut ThinkTagSplitter) {
        match event {
            CanonicalEvent::TextDelta { content } => {
                for segment in splitter.push(&content) {
                    self.relay_segment(segment).await;
                }
                self.state.is_thinking = splitter.is_thinking();
            }
            CanonicalEvent::ReasoningDelta { content } => {
                self.relay_segment(ThinkSegment::Reasoning(content)).await;
            }
            other => {
                tracing::debug!(event = ?other, "ignoring non-delta provider event");
            }
        }
    }

    async fn relay_segment(&mut self, segment: ThinkSegment) {
        match segment {
            ThinkSegment::Answer(text) => {
                self.state.record_answer(&text);
                self.sink.emit(CanonicalEvent::text(text)).await;
            }
            ThinkSegment::Reasoning(text) => {
                self.state.record_reasoning(&text);
                self.sink.emit(CanonicalEvent::reasoning(text)).await;
            }
        }
    }

    /// Native calls win; otherwise the answer text is scanned for markup.
    fn detect_calls(&self, response: &LlmResponse) -> (String, Vec<ToolCallRequest>) {
        if response.has_tool_calls() {
            let requests = response
                .tool_calls
                .iter()
                .map(|call| ToolCallRequest::native(call.id.clone(), call.name.clone(), call.arguments.clone()))
                .collect();
            return (self.state.accumulated_text.clone(), requests);
        }

        let prefix = format!("call_r{}", self.state.response_index);
        let detection = detect_tool_calls(&self.state.accumulated_text, &self.descriptors, &prefix);
        (detection.text, detection.requests)
    }

    async fn invoke_round(
        &mut self,
        requests: &[ToolCallRequest],
        assistant_id: &str,
    ) -> Result<Vec<ToolCallResult>, TurnError> {
        self.state.transition(LoopPhase::Invoking);
        let tracking = self.config().agent_tracking;
        let tracker = Arc::clone(&self.orchestrator.tracker);

        // Call ids repeat across concurrent turns; tasks are addressed by task id.
        let mut task_ids = Vec::with_capacity(requests.len());
        for request in requests {
            self.sink.emit(CanonicalEvent::requested(request)).await;
            task_ids.push(tracking.then(|| {
                let args = truncate_for_log(&request.arguments.to_string(), TASK_DESCRIPTION_LIMIT);
                tracker.create_task(&request.call_id, &request.tool_name, &args, assistant_id)
            }));
        }

        let mut results = Vec::with_capacity(requests.len());
        for (request, task_id) in requests.iter().zip(&task_ids) {
            if self.cancel.is_cancelled() {
                return Err(TurnError::Cancelled);
            }
            let result = self.invoke_one(request, task_id.as_deref()).await?;
            if let Some(task_id) = task_id {
                tracker.mark_resolved(task_id, !result.is_error());
            }
            self.sink.emit(CanonicalEvent::resolved(&result)).await;
            results.push(result);
        }
        Ok(results)
    }

    async fn invoke_one(
        &self,
        request: &ToolCallRequest,
        task_id: Option<&str>,
    ) -> Result<ToolCallResult, TurnError> {
        let orchestrator = self.orchestrator;
        let log_limit = self.config().log_payload_limit;

        let descriptor = match orchestrator.registry.resolve(&request.tool_name) {
            Ok(descriptor) => descriptor.clone(),
            Err(e) => {
                tracing::warn!(call_id = %request.call_id, tool = %request.tool_name, "unknown tool requested");
                return Ok(ToolCallResult::error(
                    &request.call_id,
                    &request.tool_name,
                    ToolErrorKind::NotFound,
                    e.to_string(),
                )
                .with_log_limit(log_limit));
            }
        };

        if !orchestrator.tracker.try_reserve() {
            tracing::warn!(
                call_id = %request.call_id,
                tool = %request.tool_name,
                max_calls = self.config().max_tool_calls_per_session,
                "tool call budget exhausted; call refused"
            );
            return Ok(ToolCallResult::error(
                &request.call_id,
                &request.tool_name,
                ToolErrorKind::BudgetExhausted,
                format!(
                    "Tool call budget exhausted ({} calls per session)",
                    self.config().max_tool_calls_per_session
                ),
            )
            .with_log_limit(log_limit));
        }
        if let Some(task_id) = task_id {
            orchestrator.tracker.mark_running(task_id);
        }

        // Spawned so a cancelled turn can walk away while the tool finishes.
        let invoker = Arc::clone(&orchestrator.invoker);
        let owned = request.clone();
        let timeout = self.config().tool_timeout();
        let handle = tokio::spawn(async move { invoker.invoke(&owned, &descriptor, timeout).await });

        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(call_id = %request.call_id, "turn cancelled; tool result will be discarded");
                Err(TurnError::Cancelled)
            }
            joined = handle => Ok(joined.unwrap_or_else(|e| {
                ToolCallResult::error(
                    &request.call_id,
                    &request.tool_name,
                    ToolErrorKind::Backend,
                    format!("tool task failed: {}", e),
                )
                .with_log_limit(log_limit)
            })),
        }
    }

    /// Emit the terminal events and package the outcome.
    async fn finish(mut self, result: Result<String, TurnError>) -> TurnOutcome {
        let (status, error) = match result {
            Ok(stop_reason) => {
                self.state.transition(LoopPhase::Completed);
                let usage = &self.state.usage;
                self.sink
                    .emit(CanonicalEvent::Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        reasoning_tokens: usage.reasoning_tokens,
                    })
                    .await;
                self.sink
                    .emit(CanonicalEvent::Done {
                        stop_reason: Some(stop_reason),
                    })
                    .await;
                (TurnStatus::Completed, None)
            }
            Err(TurnError::Cancelled) => {
                self.state.transition(LoopPhase::Cancelled);
                (TurnStatus::Cancelled, Some(TurnError::Cancelled))
            }
            Err(error) => {
                self.state.transition(LoopPhase::Failed);
                tracing::warn!(code = error.code(), error = %error, "turn failed");
                self.sink
                    .emit(CanonicalEvent::Error {
                        message: error.to_string(),
                        code: Some(error.code().to_string()),
                        call_id: error.call_id().map(str::to_string),
                        tool_name: error.tool_name().map(str::to_string),
                    })
                    .await;
                (TurnStatus::Failed, Some(error))
            }
        };

        let final_text = if status == TurnStatus::Completed {
            self.final_text
        } else {
            self.state.accumulated_text.clone()
        };

        TurnOutcome {
            status,
            rounds: self.state.round_index,
            final_text,
            reasoning: self.reasoning,
            latency: self.state.latency(),
            usage: self.state.usage.clone(),
            history: self.history.into_new_messages(),
            segments: self.segments,
            error,
        }
    }
}
