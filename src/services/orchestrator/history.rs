//! Conversation History
//!
//! The turn's conversation as the application stores it, and the conversion
//! into provider messages for each request. History only grows: a replayed
//! round appends new messages and the provider view is rebuilt from scratch.

use chatloop_core::{ToolCallRequest, ToolCallResult};
use chatloop_llm::{Message, MessageContent, MessageRole, ToolCallingMode};
use chatloop_tools::{format_tool_result, strip_markers};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    /// Base64 for images, plain text otherwise
    pub data: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tool_results: Vec<ToolCallResult>,
    /// Calls this assistant message asked for and that were replayed
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            attachments: Vec::new(),
            tool_results: Vec::new(),
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Results of one tool round, replayed to the model as a user message.
    pub fn tool_results(results: Vec<ToolCallResult>) -> Self {
        Self {
            tool_results: results,
            ..Self::new(MessageRole::User, "")
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Convert to the provider's message shape.
    pub fn to_llm_message(&self, mode: ToolCallingMode) -> Message {
        let mut content = Vec::new();

        match mode {
            ToolCallingMode::Native => {
                for result in &self.tool_results {
                    content.push(MessageContent::ToolResult {
                        tool_use_id: result.call_id.clone(),
                        content: result.payload.clone(),
                        is_error: result.is_error().then_some(true),
                    });
                }
            }
            ToolCallingMode::Prompt => {
                let rendered: Vec<String> = self
                    .tool_results
                    .iter()
                    .map(|r| format_tool_result(&r.tool_name, &r.call_id, &r.payload, r.is_error()))
                    .collect();
                if !rendered.is_empty() {
                    content.push(MessageContent::Text {
                        text: rendered.join("\n\n"),
                    });
                }
            }
        }

        let text = match self.role {
            MessageRole::Assistant => strip_markers(&self.content),
            _ => self.content.clone(),
        };
        if !text.is_empty() {
            content.push(MessageContent::Text { text });
        }

        for attachment in &self.attachments {
            if attachment.is_image() {
                content.push(MessageContent::Image {
                    media_type: attachment.media_type.clone(),
                    data: attachment.data.clone(),
                });
            } else {
                content.push(MessageContent::Text {
                    text: format!("[Attachment: {}]\n{}", attachment.name, attachment.data),
                });
            }
        }

        // Prompt-mode calls are not replayed, only their results; native calls go back as blocks.
        if mode == ToolCallingMode::Native {
            for call in &self.tool_calls {
                content.push(MessageContent::ToolUse {
                    id: call.call_id.clone(),
                    name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                });
            }
        }

        Message {
            role: self.role,
            content,
        }
    }
}

/// Append-only conversation for one turn.
#[derive(Debug, Clone, Default)]
pub struct HistoryBuilder {
    messages: Vec<ConversationMessage>,
    /// Messages before this index existed before the turn started
    turn_start: usize,
}

impl HistoryBuilder {
    pub fn new(prior: Vec<ConversationMessage>) -> Self {
        let turn_start = prior.len();
        Self {
            messages: prior,
            turn_start,
        }
    }

    pub fn append(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Messages appended during this turn.
    pub fn new_messages(&self) -> &[ConversationMessage] {
        &self.messages[self.turn_start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Provider messages for the next request. System messages are left to
    /// the request's system prompt.
    pub fn to_llm_messages(&self, mode: ToolCallingMode) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| m.to_llm_message(mode))
            .filter(|m| !m.content.is_empty())
            .collect()
    }

    /// Consume the builder, returning the messages added during the turn.
    pub fn into_new_messages(mut self) -> Vec<ConversationMessage> {
        self.messages.split_off(self.turn_start)
    }
}
