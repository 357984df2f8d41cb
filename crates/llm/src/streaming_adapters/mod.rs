//! Provider-Specific Stream Adapters
//!
//! Each adapter handles the unique streaming format of its provider.

pub mod claude_api;
pub mod ollama;
pub mod openai_compat;

pub use claude_api::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai_compat::OpenAICompatAdapter;
