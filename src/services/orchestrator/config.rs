//! Orchestrator Configuration
//!
//! Loop bounds, tool-calling mode, and per-session limits. Keys are camelCase
//! so the same document works as JSON from a settings store or as a TOML
//! file on disk.

use std::path::Path;
use std::time::Duration;

use chatloop_core::{CoreError, CoreResult, DEFAULT_LOG_PAYLOAD_LIMIT};
use chatloop_llm::ToolCallingMode;
use serde::{Deserialize, Serialize};

/// Whether a provider with several API keys cycles through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialRotation {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Tool rounds allowed in one turn; 0 disables tool execution
    #[serde(default = "default_max_rounds_per_turn")]
    pub max_rounds_per_turn: u32,
    /// Tool invocations allowed across the session until the budget is reset
    #[serde(default = "default_max_tool_calls_per_session")]
    pub max_tool_calls_per_session: u32,
    #[serde(default)]
    pub tool_calling_mode: ToolCallingMode,
    #[serde(default = "default_per_tool_invocation_timeout_ms")]
    pub per_tool_invocation_timeout_ms: u64,
    #[serde(default)]
    pub credential_rotation: CredentialRotation,
    /// Output token budget per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Appended after tool results when the conversation is replayed
    #[serde(default = "default_continuation_instruction")]
    pub continuation_instruction: String,
    /// Create agent tasks for tool calls
    #[serde(default)]
    pub agent_tracking: bool,
    /// Characters of tool payload kept in log output
    #[serde(default = "default_log_payload_limit")]
    pub log_payload_limit: usize,
}

fn default_max_rounds_per_turn() -> u32 {
    10
}

fn default_max_tool_calls_per_session() -> u32 {
    100
}

fn default_per_tool_invocation_timeout_ms() -> u64 {
    30_000
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_continuation_instruction() -> String {
    "Continue based on the tool results above. Call more tools only if you still need information."
        .to_string()
}

fn default_log_payload_limit() -> usize {
    DEFAULT_LOG_PAYLOAD_LIMIT
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds_per_turn: default_max_rounds_per_turn(),
            max_tool_calls_per_session: default_max_tool_calls_per_session(),
            tool_calling_mode: ToolCallingMode::default(),
            per_tool_invocation_timeout_ms: default_per_tool_invocation_timeout_ms(),
            credential_rotation: CredentialRotation::default(),
            max_tokens: default_max_tokens(),
            continuation_instruction: default_continuation_instruction(),
            agent_tracking: false,
            log_payload_limit: default_log_payload_limit(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| CoreError::config(format!("invalid orchestrator config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading orchestrator config");
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.per_tool_invocation_timeout_ms == 0 {
            return Err(CoreError::validation("perToolInvocationTimeoutMs must be positive"));
        }
        if self.max_tokens == 0 {
            return Err(CoreError::validation("maxTokens must be positive"));
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.per_tool_invocation_timeout_ms)
    }

    pub fn rotate_credentials(&self) -> bool {
        self.credential_rotation == CredentialRotation::Enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_rounds_per_turn, 10);
        assert_eq!(config.max_tool_calls_per_session, 100);
        assert_eq!(config.tool_calling_mode, ToolCallingMode::Native);
        assert_eq!(config.tool_timeout(), Duration::from_secs(30));
        assert!(config.rotate_credentials());
        assert!(!config.agent_tracking);
        assert_eq!(config.log_payload_limit, 500);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
maxRoundsPerTurn = 3
toolCallingMode = "prompt"
credentialRotation = "disabled"
agentTracking = true
"#,
        )
        .unwrap();
        assert_eq!(config.max_rounds_per_turn, 3);
        assert_eq!(config.tool_calling_mode, ToolCallingMode::Prompt);
        assert!(!config.rotate_credentials());
        assert!(config.agent_tracking);
        assert_eq!(config.max_tokens, 4096);
    }

    #[test]
    fn test_json_keys_are_camel_case() {
        let json = serde_json::to_value(OrchestratorConfig::default()).unwrap();
        assert_eq!(json["perToolInvocationTimeoutMs"], 30_000);
        assert_eq!(json["toolCallingMode"], "native");
        assert_eq!(json["credentialRotation"], "enabled");
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = OrchestratorConfig::from_toml_str("perToolInvocationTimeoutMs = 0").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        let err = OrchestratorConfig::from_toml_str("toolCallingMode = \"telepathy\"").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "maxToolCallsPerSession = 7").unwrap();
        let config = OrchestratorConfig::load(file.path()).unwrap();
        assert_eq!(config.max_tool_calls_per_session, 7);

        assert!(matches!(
            OrchestratorConfig::load("/nonexistent/chatloop.toml"),
            Err(CoreError::Io(_))
        ));
    }
}
