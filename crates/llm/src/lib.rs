//! Chatloop LLM
//!
//! A single streaming contract over several LLM backends:
//! - Anthropic Messages API
//! - OpenAI Chat Completions and compatible endpoints (DeepSeek, Qwen)
//! - Ollama (local inference)
//!
//! Every provider normalizes its wire format into canonical answer/reasoning
//! deltas plus native tool calls. Also includes credential rotation, the SSE
//! driver shared by all providers, and a scripted provider for tests.

pub mod anthropic;
pub mod credentials;
pub mod factory;
pub mod http_client;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod sse;
pub mod streaming_adapters;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use credentials::CredentialRotator;
pub use factory::build_provider;
pub use http_client::build_http_client;
pub use mock::{ScriptedProvider, ScriptedTurn};
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use sse::StreamAccumulator;
pub use types::*;

pub use streaming_adapters::{AnthropicAdapter, OllamaAdapter, OpenAICompatAdapter};
