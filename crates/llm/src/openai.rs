//! OpenAI Provider
//!
//! Chat Completions API. Also serves OpenAI-compatible endpoints (DeepSeek,
//! Qwen via DashScope compatible mode) by overriding the base URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatloop_core::{CanonicalEvent, ToolDescriptor};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::credentials::CredentialRotator;
use crate::http_client::{build_http_client, endpoint};
use crate::provider::{missing_api_key_error, parse_http_error, send_cancellable, LlmProvider};
use crate::sse::drive_stream;
use crate::streaming_adapters::OpenAICompatAdapter;
use crate::types::{
    CompletionRequest, LlmError, LlmResponse, LlmResult, Message, MessageContent, MessageRole,
    ProviderConfig, ProviderType, StopReason, ToolCall, UsageStats,
};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com/v1";
const QWEN_API_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    credentials: Arc<CredentialRotator>,
    name: &'static str,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig, credentials: Arc<CredentialRotator>) -> LlmResult<Self> {
        let client = build_http_client(config.request_timeout_secs.map(Duration::from_secs))?;
        let name = match config.provider {
            ProviderType::DeepSeek => "deepseek",
            ProviderType::Qwen => "qwen",
            _ => "openai",
        };
        Ok(Self {
            config,
            client,
            credentials,
            name,
        })
    }

    fn base_url(&self) -> &str {
        if let Some(base) = self.config.base_url.as_deref() {
            return base;
        }
        match self.config.provider {
            ProviderType::DeepSeek => DEEPSEEK_API_BASE,
            ProviderType::Qwen => QWEN_API_BASE,
            _ => OPENAI_API_BASE,
        }
    }

    /// o-series models reject `temperature`.
    fn model_is_reasoning_series(&self) -> bool {
        let model = self.config.model.to_lowercase();
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
    }

    fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });

        if !self.model_is_reasoning_series() {
            body["temperature"] = json!(self.config.temperature);
        }

        let mut openai_messages: Vec<Value> = Vec::new();
        if let Some(sys) = &request.system {
            openai_messages.push(json!({"role": "system", "content": sys}));
        }
        for msg in &request.messages {
            openai_messages.extend(self.message_to_openai(msg));
        }
        body["messages"] = json!(openai_messages);

        let tools = request.wire_tools();
        if !tools.is_empty() {
            body["tools"] = self.translate_tools(tools);
        }

        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }

        for (key, value) in &self.config.options {
            body[key.as_str()] = value.clone();
        }

        body
    }

    /// One canonical message may become several wire messages: each tool
    /// result is its own `tool` message, followed by any accompanying text.
    fn message_to_openai(&self, message: &Message) -> Vec<Value> {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };

        let mut out = Vec::new();
        for content in &message.content {
            if let MessageContent::ToolResult {
                tool_use_id,
                content,
                ..
            } = content
            {
                out.push(json!({"role": "tool", "tool_call_id": tool_use_id, "content": content}));
            }
        }

        let tool_calls: Vec<Value> = message
            .content
            .iter()
            .filter_map(|c| match c {
                MessageContent::ToolUse { id, name, input } => Some(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()}
                })),
                _ => None,
            })
            .collect();

        let has_images = message
            .content
            .iter()
            .any(|c| matches!(c, MessageContent::Image { .. }));
        let text = message.text_content();

        if !tool_calls.is_empty() {
            // Some compatible APIs require the content field even when null.
            let content = if text.is_empty() { Value::Null } else { json!(text) };
            out.push(json!({"role": role, "content": content, "tool_calls": tool_calls}));
        } else if has_images {
            let parts: Vec<Value> = message
                .content
                .iter()
                .filter_map(|c| match c {
                    MessageContent::Text { text } => Some(json!({"type": "text", "text": text})),
                    MessageContent::Image { media_type, data } => Some(json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{};base64,{}", media_type, data)}
                    })),
                    _ => None,
                })
                .collect();
            out.push(json!({"role": role, "content": parts}));
        } else if !text.is_empty() || out.is_empty() {
            out.push(json!({"role": role, "content": text}));
        }

        out
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> LlmResult<reqwest::RequestBuilder> {
        let api_key = self
            .credentials
            .next_key()
            .ok_or_else(|| missing_api_key_error(self.name))?;
        Ok(builder
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json"))
    }

    fn parse_response(&self, response: OpenAIResponse) -> LlmResponse {
        let choice = response.choices.into_iter().next();
        let mut content = None;
        let mut reasoning = None;
        let mut tool_calls = Vec::new();
        let mut finish_reason = None;

        if let Some(choice) = choice {
            finish_reason = choice.finish_reason;
            if let Some(msg) = choice.message {
                content = msg.content.filter(|c| !c.is_empty());
                reasoning = msg.reasoning_content.filter(|r| !r.is_empty());
                for tc in msg.tool_calls.unwrap_or_default() {
                    let arguments = if tc.function.arguments.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&tc.function.arguments)
                            .unwrap_or(Value::String(tc.function.arguments))
                    };
                    tool_calls.push(ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments,
                    });
                }
            }
        }

        LlmResponse {
            content,
            reasoning,
            tool_calls,
            stop_reason: finish_reason
                .as_deref()
                .map(StopReason::from)
                .unwrap_or(StopReason::EndTurn),
            usage: response
                .usage
                .map(|u| UsageStats {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                    reasoning_tokens: None,
                })
                .unwrap_or_default(),
            model: response.model,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_reasoning(&self) -> bool {
        let model = self.config.model.to_lowercase();
        self.model_is_reasoning_series()
            || model.contains("reasoner")
            || model.contains("r1")
            || model.contains("qwq")
            || model.contains("qwen3")
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
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.argument_schema,
                        }
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
        let url = endpoint(self.base_url(), "chat/completions")?;
        tracing::debug!(provider = self.name, %url, model = %self.config.model, "streaming request");

        let body = self.build_request_body(&request, true);
        let builder = self.authorized(self.client.post(&url))?.json(&body);
        let response = send_cancellable(builder, &request, self.name).await?;

        let mut adapter = OpenAICompatAdapter::new(self.name);
        drive_stream(response, &mut adapter, &sink, &request.cancel, &self.config.model).await
    }

    async fn non_stream(&self, request: CompletionRequest) -> LlmResult<LlmResponse> {
        request.validate()?;
        let url = endpoint(self.base_url(), "chat/completions")?;
        let body = self.build_request_body(&request, false);
        let builder = self.authorized(self.client.post(&url))?.json(&body);
        let response = send_cancellable(builder, &request, self.name).await?;

        let parsed: OpenAIResponse = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(LlmError::Cancelled),
            res = response.json() => res.map_err(LlmError::parse)?,
        };
        Ok(self.parse_response(parsed))
    }

    async fn health_check(&self) -> LlmResult<()> {
        let url = endpoint(self.base_url(), "models")?;
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
            Err(parse_http_error(status, &body, self.name))
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// OpenAI API response format
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
