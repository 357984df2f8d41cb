//! HTTP Client Factory

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

/// Build a `reqwest::Client`, optionally bounded by a whole-request timeout.
///
/// Proxy settings come from the environment (`HTTPS_PROXY` and friends).
pub fn build_http_client(timeout: Option<Duration>) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| LlmError::Other {
        message: format!("failed to build HTTP client: {}", e),
    })
}

/// Join a base URL and a path, validating the base.
pub fn endpoint(base: &str, path: &str) -> LlmResult<String> {
    let parsed = url::Url::parse(base).map_err(|e| LlmError::InvalidRequest {
        message: format!("invalid base URL '{}': {}", base, e),
    })?;
    let base = parsed.as_str().trim_end_matches('/');
    Ok(format!("{}/{}", base, path.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(None).is_ok());
        assert!(build_http_client(Some(Duration::from_secs(30))).is_ok());
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("https://api.deepseek.com/v1/", "/chat/completions").unwrap(),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("http://localhost:11434", "api/chat").unwrap(),
            "http://localhost:11434/api/chat"
        );
        assert!(endpoint("not a url", "x").is_err());
    }
}
