pub mod gemini;
pub mod http;
pub mod huggingface;
pub mod mock;
pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;

use self::gemini::Gemini;
use self::http::HttpProvider;
use self::huggingface::HuggingFace;
use self::openai::OpenAi;

/// How a provider expects its API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Key passed as a URL query parameter with this name.
    QueryParam(&'static str),
}

/// Translates between a prompt and one provider's wire format.
/// Pure: no I/O, no state between calls.
pub trait ProviderAdapter: Send + Sync {
    /// Name reported in every result from this provider.
    fn source(&self) -> &str;

    fn auth_style(&self) -> AuthStyle {
        AuthStyle::Bearer
    }

    /// Build the JSON request body for `prompt`.
    fn encode(&self, prompt: &str) -> Result<Vec<u8>, ProviderError>;

    /// Pull the answer text out of a successful response body.
    fn decode(&self, body: &[u8]) -> Result<String, ProviderError>;
}

/// One attempt at getting an answer. No retry, no circuit breaking;
/// that is [`ResilientProvider`](crate::resilience::ResilientProvider)'s job.
#[async_trait]
pub trait Provider: Send + Sync {
    fn source(&self) -> &str;
    async fn call(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Wire up the HTTP provider described by `config`.
pub fn from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match config.kind {
        ProviderKind::OpenAi => {
            let model = config.model.clone().unwrap_or_else(OpenAi::default_model);
            Arc::new(HttpProvider::new(OpenAi::new(model), config)?)
        }
        ProviderKind::HuggingFace => Arc::new(HttpProvider::new(HuggingFace, config)?),
        ProviderKind::Gemini => Arc::new(HttpProvider::new(Gemini, config)?),
    };
    Ok(provider)
}

/// Map a serde failure on a provider payload to a provider error.
pub(crate) fn malformed(err: serde_json::Error) -> ProviderError {
    ProviderError::Serialization(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            kind,
            api_key: "key".to_string(),
            url: "http://127.0.0.1:9/v1".to_string(),
            model: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn from_config_names_each_provider() {
        let cases = [
            (ProviderKind::OpenAi, "OpenAI"),
            (ProviderKind::HuggingFace, "HuggingFace"),
            (ProviderKind::Gemini, "Gemini"),
        ];
        for (kind, name) in cases {
            let provider = from_config(&config(kind)).unwrap();
            assert_eq!(provider.source(), name);
        }
    }

    #[test]
    fn from_config_rejects_bad_url() {
        let mut cfg = config(ProviderKind::OpenAi);
        cfg.url = "not a url".to_string();
        assert!(from_config(&cfg).is_err());
    }
}
