//! Anthropic Provider
//!
//! Messages API with streaming, extended thinking and native tool use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatloop_core::{CanonicalEvent, ToolDescriptor};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::credentials::CredentialRotator;
use crate::http_client::{build_http_client, endpoint};
use crate::provider::{missing_api_key_error, send_cancellable, LlmProvider};
use crate::sse::drive_stream;
use crate::streaming_adapters::AnthropicAdapter;
use crate::types::{
    CompletionRequest, LlmError, LlmResponse, LlmResult, Message, MessageContent, MessageRole,
    ProviderConfig, StopReason, ToolCall, UsageStats,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    credentials: Arc<CredentialRotator>,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, credentials: Arc<CredentialRotator>) -> LlmResult<Self> {
        let client = build_http_client(config.request_timeout_secs.map(Duration::from_secs))?;
        Ok(Self {
            config,
            client,
            credentials,
        })
    }

    fn messages_url(&self) -> LlmResult<String> {
        endpoint(
            self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_BASE),
            "messages",
        )
    }

    fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });

        // System messages in the history are folded into the system prompt.
        let mut system_parts: Vec<String> = request.system.iter().cloned().collect();
        let mut messages = Vec::new();
        for msg in &request.messages {
            if msg.role == MessageRole::System {
                system_parts.push(msg.text_content());
            } else {
                messages.push(self.message_to_anthropic(msg));
            }
        }
        body["messages"] = json!(messages);
        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n\n"));
        }

        if self.config.enable_thinking {
            let budget = self.config.thinking_budget.unwrap_or(1024).max(1024);
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        } else {
            body["temperature"] = json!(self.config.temperature);
        }

        let tools = request.wire_tools();
        if !tools.is_empty() {
            body["tools"] = self.translate_tools(tools);
        }

        for (key, value) in &self.config.options {
            body[key.as_str()] = value.clone();
        }

        body
    }

    fn message_to_anthropic(&self, message: &Message) -> Value {
        let role = match message.role {
            MessageRole::Assistant => "assistant",
            _ => "user",
        };
        let blocks: Vec<Value> = message
            .content
            .iter()
            .map(|c| match c {
                MessageContent::Text { text } => json!({"type": "text", "text": text}),
                MessageContent::ToolUse { id, name, input } => {
                    json!({"type": "tool_use", "id": id, "name": name, "input": input})
                }
                MessageContent::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let mut block =
                        json!({"type": "tool_result", "tool_use_id": tool_use_id, "content": content});
                    if is_error.unwrap_or(false) {
                        block["is_error"] = json!(true);
                    }
                    block
                }
                MessageContent::Image { media_type, data } => json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": media_type, "data": data}
                }),
            })
            .collect();
        json!({"role": role, "content": blocks})
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> LlmResult<reqwest::RequestBuilder> {
        let api_key = self
            .credentials
            .next_key()
            .ok_or_else(|| missing_api_key_error("anthropic"))?;
        Ok(builder
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json"))
    }

    fn parse_response(&self, response: AnthropicResponse) -> LlmResponse {
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                ResponseBlock::Text { text } => content.push_str(&text),
                ResponseBlock::Thinking { thinking } => reasoning.push_str(&thinking),
                ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ResponseBlock::Other => {}
            }
        }

        LlmResponse {
            content: (!content.is_empty()).then_some(content),
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
            tool_calls,
            stop_reason: response
                .stop_reason
                .as_deref()
                .map(StopReason::from)
                .unwrap_or(StopReason::EndTurn),
            usage: UsageStats {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                reasoning_tokens: None,
            },
            model: response.model,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_reasoning(&self) -> bool {
        self.config.enable_thinking
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    fn translate_tools(&self, tools: &[ToolDescriptor]) -> Value {
        Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.argument_schema,
                    })
                })
                .collect(),
        )
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        sink: mpsc::Sender<CanonicalEvent>,
    ) -> LlmResult<LlmResponse> {
        request.validate()?;
        let url = self.messages_url()?;
        tracing::debug!(provider = "anthropic", %url, model = %self.config.model, "streaming request");

        let body = self.build_request_body(&request, true);
        let builder = self.authorized(self.client.post(&url))?.json(&body);
        let response = send_cancellable(builder, &request, "anthropic").await?;

        let mut adapter = AnthropicAdapter::new();
        drive_stream(response, &mut adapter, &sink, &request.cancel, &self.config.model).await
    }

    async fn non_stream(&self, request: CompletionRequest) -> LlmResult<LlmResponse> {
        request.validate()?;
        let url = self.messages_url()?;
        let body = self.build_request_body(&request, false);
        let builder = self.authorized(self.client.post(&url))?.json(&body);
        let response = send_cancellable(builder, &request, "anthropic").await?;

        let parsed: AnthropicResponse = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(LlmError::Cancelled),
            res = response.json() => res.map_err(LlmError::parse)?,
        };
        Ok(self.parse_response(parsed))
    }

    async fn health_check(&self) -> LlmResult<()> {
        let url = endpoint(
            self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_BASE),
            "models",
        )?;
        let response = self
            .authorized(self.client.get(&url))?
            .send()
            .await
            .map_err(LlmError::network)?;
        let status = response.status().as_u16();
        if status == 200 {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(crate::provider::parse_http_error(status, &body, "anthropic"))
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
}
