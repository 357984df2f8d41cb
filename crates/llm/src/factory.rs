//! Provider Factory

use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::credentials::CredentialRotator;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAIProvider;
use crate::provider::LlmProvider;
use crate::types::{LlmResult, ProviderConfig, ProviderType};

/// Build a provider for `config`, giving it its own credential rotator.
pub fn build_provider(config: ProviderConfig, rotate_credentials: bool) -> LlmResult<Arc<dyn LlmProvider>> {
    let credentials = Arc::new(CredentialRotator::new(config.api_keys.clone(), rotate_credentials));
    tracing::debug!(
        provider = %config.provider,
        model = %config.model,
        keys = credentials.len(),
        rotate_credentials,
        "building provider"
    );

    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(config, credentials)?),
        ProviderType::OpenAI | ProviderType::DeepSeek | ProviderType::Qwen => {
            Arc::new(OpenAIProvider::new(config, credentials)?)
        }
        ProviderType::Ollama => Arc::new(OllamaProvider::new(config, credentials)?),
    };
    Ok(provider)
}
