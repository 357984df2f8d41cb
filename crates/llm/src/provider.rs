//! LLM Provider Trait
//!
//! Defines the common interface for all LLM providers.

use async_trait::async_trait;
use chatloop_core::{CanonicalEvent, ToolDescriptor};
use tokio::sync::mpsc;

use super::types::{CompletionRequest, LlmError, LlmResponse, LlmResult, ProviderConfig};

/// Trait that all LLM providers must implement.
///
/// One implementation per vendor. Each translates a [`CompletionRequest`]
/// into its wire format and normalizes the response into answer text,
/// reasoning text, and native tool calls.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Returns whether this provider delivers reasoning through a dedicated field.
    fn supports_reasoning(&self) -> bool;

    /// Returns whether this provider supports native tool calling.
    fn supports_native_tools(&self) -> bool;

    /// Vendor tool schema for the given descriptors.
    fn translate_tools(&self, tools: &[ToolDescriptor]) -> serde_json::Value;

    /// Stream a completion.
    ///
    /// `TextDelta` and `ReasoningDelta` events are pushed to `sink` in
    /// generation order. Native tool calls, usage and the stop reason are
    /// returned in the aggregated response rather than forwarded; the
    /// orchestrator emits its own lifecycle events for those.
    ///
    /// Returns [`LlmError::Cancelled`] as soon as the request's token fires.
    async fn stream(
        &self,
        request: CompletionRequest,
        sink: mpsc::Sender<CanonicalEvent>,
    ) -> LlmResult<LlmResponse>;

    /// Single-shot completion with the same normalization as [`Self::stream`].
    async fn non_stream(&self, request: CompletionRequest) -> LlmResult<LlmResponse>;

    /// Check if the provider is healthy and reachable.
    async fn health_check(&self) -> LlmResult<()>;

    /// Get the configuration for this provider.
    fn config(&self) -> &ProviderConfig;
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Map an HTTP error status to an [`LlmError`].
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    parse_http_error_with_retry(status, body, provider, None)
}

/// Like [`parse_http_error`], carrying a `retry-after` header value for 429s.
pub fn parse_http_error_with_retry(
    status: u16,
    body: &str,
    provider: &str,
    retry_after: Option<u32>,
) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after,
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}

/// Read the `retry-after` header (seconds form only).
pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<u32> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Send a request, racing the cancellation token.
pub(crate) async fn send_cancellable(
    builder: reqwest::RequestBuilder,
    request: &CompletionRequest,
    provider: &str,
) -> LlmResult<reqwest::Response> {
    let response = tokio::select! {
        biased;
        _ = request.cancel.cancelled() => return Err(LlmError::Cancelled),
        res = builder.send() => res.map_err(LlmError::network)?,
    };

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let retry_after = retry_after_header(&response);
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(provider, status, "provider returned HTTP error");
        return Err(parse_http_error_with_retry(status, &body, provider, retry_after));
    }
    Ok(response)
}
