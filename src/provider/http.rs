use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{AuthStyle, Provider, ProviderAdapter};
use crate::config::ProviderConfig;
use crate::consts::{MAX_ERROR_BODY, truncate};
use crate::error::ProviderError;

/// Generic JSON-over-HTTP provider. The adapter owns the wire format;
/// this owns the transport, auth and status handling.
pub struct HttpProvider<A> {
    adapter: A,
    client: reqwest::Client,
    url: Url,
    bearer: Option<String>,
}

impl<A: ProviderAdapter> HttpProvider<A> {
    pub fn new(adapter: A, config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;

        let (url, bearer) = match adapter.auth_style() {
            AuthStyle::Bearer => {
                let url = Url::parse(&config.url)
                    .with_context(|| format!("invalid {} URL: {}", adapter.source(), config.url))?;
                (url, Some(config.api_key.clone()))
            }
            AuthStyle::QueryParam(name) => {
                let url = Url::parse_with_params(&config.url, [(name, config.api_key.as_str())])
                    .with_context(|| format!("invalid {} URL: {}", adapter.source(), config.url))?;
                (url, None)
            }
        };

        Ok(Self {
            adapter,
            client,
            url,
            bearer,
        })
    }
}

#[async_trait]
impl<A: ProviderAdapter> Provider for HttpProvider<A> {
    fn source(&self) -> &str {
        self.adapter.source()
    }

    async fn call(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = self.adapter.encode(prompt)?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(provider = %self.source(), %status, len = bytes.len(), "provider responded");

        if !status.is_success() {
            return Err(ProviderError::Status {
                code: status.as_u16(),
                body: truncate(&String::from_utf8_lossy(&bytes), MAX_ERROR_BODY),
            });
        }

        self.adapter.decode(&bytes)
    }
}
