//! Fan a prompt out to every provider and collect one answer per provider.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ProviderError;
use crate::provider::{self, Provider};
use crate::resilience::{CircuitSnapshot, ResilienceConfig, ResilientProvider};
use crate::types::{AggregatedResult, Prompt, ProviderCallResult};

#[derive(Debug, Clone, Default)]
pub struct AggregatorConfig {
    /// Give up on providers still running after this long. `None` waits for
    /// the slowest one.
    pub deadline: Option<Duration>,
}

pub struct Aggregator {
    members: Vec<Arc<ResilientProvider>>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(providers: Vec<Arc<dyn Provider>>, resilience: &ResilienceConfig) -> Self {
        Self::with_config(providers, resilience, AggregatorConfig::default())
    }

    pub fn with_config(
        providers: Vec<Arc<dyn Provider>>,
        resilience: &ResilienceConfig,
        config: AggregatorConfig,
    ) -> Self {
        let members = providers
            .into_iter()
            .map(|provider| Arc::new(ResilientProvider::new(provider, resilience)))
            .collect();
        Self { members, config }
    }

    /// Build every provider named in `config`. Fails when none is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.providers.is_empty() {
            bail!(
                "no providers configured: set at least one of \
                 OPENAI_API_KEY, HUGGINGFACE_API_KEY, GEMINI_API_KEY"
            );
        }
        let providers = config
            .providers
            .iter()
            .map(provider::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_config(
            providers,
            &config.resilience,
            config.aggregator.clone(),
        ))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn sources(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.source()).collect()
    }

    /// Current breaker state of every provider.
    pub fn circuits(&self) -> Vec<(String, CircuitSnapshot)> {
        self.members
            .iter()
            .map(|m| (m.source().to_string(), m.circuit()))
            .collect()
    }

    /// Ask every provider concurrently. Always returns exactly one entry per
    /// provider, sorted by source, whatever failed along the way.
    pub async fn merged_results(&self, prompt: &Prompt) -> AggregatedResult {
        let deadline = self.config.deadline;

        let futures: Vec<_> = self
            .members
            .iter()
            .map(|member| {
                let source = member.source().to_string();
                let member = Arc::clone(member);
                let prompt = prompt.as_str().to_string();

                let handle = tokio::spawn(async move {
                    match deadline {
                        Some(limit) => {
                            match tokio::time::timeout(limit, member.execute(&prompt)).await {
                                Ok(result) => result,
                                Err(_) => ProviderCallResult::failure(
                                    member.source(),
                                    ProviderError::Timeout(format!(
                                        "no answer within {}ms",
                                        limit.as_millis()
                                    )),
                                ),
                            }
                        }
                        None => member.execute(&prompt).await,
                    }
                });

                async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!(provider = %source, error = %err, "provider task aborted");
                            ProviderCallResult::failure(
                                source,
                                ProviderError::Internal(format!("provider task failed: {err}")),
                            )
                        }
                    }
                }
            })
            .collect();

        let mut results = futures::future::join_all(futures).await;
        results.sort_by(|a, b| a.source.cmp(&b.source));

        for result in &results {
            debug!(provider = %result.source, ok = result.is_success(), "provider finished");
        }

        AggregatedResult { results }
    }
}
