//! Collaborator Contracts
//!
//! The orchestrator does not assemble prompts from user preferences or own
//! storage. It consumes these traits instead; simple default implementations
//! are provided for embedding and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chatloop_core::{CoreResult, ToolDescriptor};
use chatloop_tools::build_tool_use_instructions;
use tokio::sync::RwLock;

use crate::services::orchestrator::ConversationMessage;

const DEFAULT_BASE_PROMPT: &str = "You are a helpful assistant.";

/// Produces the system prompt for each request of a turn.
pub trait PromptBuilder: Send + Sync {
    fn build_system_prompt(
        &self,
        base_prompt: Option<&str>,
        tool_descriptors: &[ToolDescriptor],
        active_servers: &[String],
    ) -> String;
}

/// Base prompt, connected servers, and (in prompt mode) the tool-calling
/// instructions.
#[derive(Debug, Clone, Default)]
pub struct DefaultPromptBuilder {
    tool_instructions: bool,
}

impl DefaultPromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the inline tool-call format and the tool list.
    pub fn with_tool_instructions(mut self, enabled: bool) -> Self {
        self.tool_instructions = enabled;
        self
    }
}

impl PromptBuilder for DefaultPromptBuilder {
    fn build_system_prompt(
        &self,
        base_prompt: Option<&str>,
        tool_descriptors: &[ToolDescriptor],
        active_servers: &[String],
    ) -> String {
        let mut prompt = base_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_BASE_PROMPT)
            .to_string();

        if !active_servers.is_empty() {
            prompt.push_str("\n\nConnected tool servers: ");
            prompt.push_str(&active_servers.join(", "));
        }
        if self.tool_instructions && !tool_descriptors.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&build_tool_use_instructions(tool_descriptors));
        }
        prompt
    }
}

/// Persistence for conversations, keyed by topic.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_messages(&self, topic_id: &str, messages: &[ConversationMessage]) -> CoreResult<()>;

    async fn load_messages(&self, topic_id: &str) -> CoreResult<Vec<ConversationMessage>>;
}

#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    topics: RwLock<HashMap<String, Vec<ConversationMessage>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append_messages(&self, topic_id: &str, messages: &[ConversationMessage]) -> CoreResult<()> {
        self.topics
            .write()
            .await
            .entry(topic_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn load_messages(&self, topic_id: &str) -> CoreResult<Vec<ConversationMessage>> {
        Ok(self.topics.read().await.get(topic_id).cloned().unwrap_or_default())
    }
}
