//! Ollama Provider
//!
//! Local inference through the `/api/chat` endpoint. No API key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatloop_core::{CanonicalEvent, StreamAdapter, ToolDescriptor};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::credentials::CredentialRotator;
use crate::http_client::{build_http_client, endpoint};
use crate::provider::{send_cancellable, LlmProvider};
use crate::sse::{drive_stream, StreamAccumulator};
use crate::streaming_adapters::OllamaAdapter;
use crate::types::{
    CompletionRequest, LlmError, LlmResponse, LlmResult, Message, MessageContent, MessageRole,
    ProviderConfig,
};

const OLLAMA_DEFAULT_BASE: &str = "http://localhost:11434";

pub struct OllamaProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    /// Only used when Ollama sits behind an authenticating proxy
    credentials: Arc<CredentialRotator>,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig, credentials: Arc<CredentialRotator>) -> LlmResult<Self> {
        let client = build_http_client(config.request_timeout_secs.map(Duration::from_secs))?;
        Ok(Self {
            config,
            client,
            credentials,
        })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_BASE)
    }

    fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(sys) = &request.system {
            messages.push(json!({"role": "system", "content": sys}));
        }
        for msg in &request.messages {
            messages.extend(self.message_to_ollama(msg));
        }

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": request.max_tokens,
            },
        });

        if self.config.enable_thinking && OllamaAdapter::model_supports_thinking(&self.config.model) {
            body["think"] = json!(true);
        }

        let tools = request.wire_tools();
        if !tools.is_empty() {
            body["tools"] = self.translate_tools(tools);
        }

        body
    }

    fn message_to_ollama(&self, message: &Message) -> Vec<Value> {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        let mut out = Vec::new();

        for content in &message.content {
            if let MessageContent::ToolResult { content, .. } = content {
                out.push(json!({"role": "tool", "content": content}));
            }
        }

        let tool_calls: Vec<Value> = message
            .content
            .iter()
            .filter_map(|c| match c {
                MessageContent::ToolUse { name, input, .. } => {
                    Some(json!({"function": {"name": name, "arguments": input}}))
                }
                _ => None,
            })
            .collect();
        let images: Vec<&str> = message
            .content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Image { data, .. } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        let text = message.text_content();

        if !text.is_empty() || !tool_calls.is_empty() || !images.is_empty() || out.is_empty() {
            let mut msg = json!({"role": role, "content": text});
            if !tool_calls.is_empty() {
                msg["tool_calls"] = json!(tool_calls);
            }
            if !images.is_empty() {
                msg["images"] = json!(images);
            }
            out.push(msg);
        }
        out
    }

    fn with_optional_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.next_key() {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_reasoning(&self) -> bool {
        OllamaAdapter::model_supports_thinking(&self.config.model)
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
        let url = endpoint(self.base_url(), "api/chat")?;
        tracing::debug!(provider = "ollama", %url, model = %self.config.model, "streaming request");

        let body = self.build_request_body(&request, true);
        let builder = self.with_optional_auth(self.client.post(&url)).json(&body);
        let response = send_cancellable(builder, &request, "ollama")
            .await
            .map_err(unavailable_on_connect)?;

        let mut adapter = OllamaAdapter::new(&self.config.model);
        drive_stream(response, &mut adapter, &sink, &request.cancel, &self.config.model).await
    }

    async fn non_stream(&self, request: CompletionRequest) -> LlmResult<LlmResponse> {
        request.validate()?;
        let url = endpoint(self.base_url(), "api/chat")?;
        let body = self.build_request_body(&request, false);
        let builder = self.with_optional_auth(self.client.post(&url)).json(&body);
        let response = send_cancellable(builder, &request, "ollama")
            .await
            .map_err(unavailable_on_connect)?;

        let text = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(LlmError::Cancelled),
            res = response.text() => res.map_err(LlmError::network)?,
        };

        // A non-streamed reply is a single chunk with done=true.
        let mut adapter = OllamaAdapter::new(&self.config.model);
        let mut acc = StreamAccumulator::new();
        for event in adapter.adapt(&text).map_err(LlmError::parse)? {
            acc.absorb(&event);
        }
        if let Some(message) = acc.error() {
            return Err(LlmError::ServerError {
                message: message.to_string(),
                status: None,
            });
        }
        Ok(acc.into_response(&self.config.model))
    }

    async fn health_check(&self) -> LlmResult<()> {
        let url = endpoint(self.base_url(), "api/tags")?;
        let response = self
            .with_optional_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| LlmError::ProviderUnavailable {
                message: format!("Ollama not reachable at {}: {}", self.base_url(), e),
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::ProviderUnavailable {
                message: format!("Ollama returned HTTP {}", response.status().as_u16()),
            })
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

fn unavailable_on_connect(err: LlmError) -> LlmError {
    match err {
        LlmError::NetworkError { message } => LlmError::ProviderUnavailable { message },
        other => other,
    }
}
