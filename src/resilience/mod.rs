//! Fault isolation around a single provider: every attempt passes through
//! that provider's circuit breaker, and transient failures are retried.

pub mod breaker;
pub mod retry;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::provider::Provider;
use crate::types::ProviderCallResult;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitHealth, CircuitSnapshot, Permit};
pub use retry::{Backoff, RetryPolicy};

#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
}

/// A provider paired with its own breaker and retry policy.
pub struct ResilientProvider {
    provider: Arc<dyn Provider>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ResilientProvider {
    pub fn new(provider: Arc<dyn Provider>, config: &ResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(provider.source(), config.breaker.clone());
        Self {
            provider,
            breaker,
            retry: config.retry.clone(),
        }
    }

    pub fn source(&self) -> &str {
        self.provider.source()
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    /// Call the provider. Never fails: errors come back inside the result.
    pub async fn execute(&self, prompt: &str) -> ProviderCallResult {
        let source = self.source();
        let provider = &self.provider;
        let breaker = &self.breaker;
        let outcome = self
            .retry
            .run(move |attempt| {
                debug!(provider = %source, attempt, "calling provider");
                breaker.call(move || provider.call(prompt))
            })
            .await;

        match outcome {
            Ok(message) => ProviderCallResult::success(source, message),
            Err(err) => {
                warn!(provider = %source, error = %err, "provider call failed");
                ProviderCallResult::failure(source, err)
            }
        }
    }
}
