use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::Provider;
use crate::error::ProviderError;

/// A scripted provider for tests. Replays outcomes in order and keeps
/// repeating the last one once the script runs out.
pub struct ScriptedProvider {
    source: String,
    script: Vec<Result<String, ProviderError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(source: impl Into<String>, script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            source: source.into(),
            script,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers `message`.
    pub fn replying(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source, vec![Ok(message.into())])
    }

    /// Always fails with `error`.
    pub fn failing(source: impl Into<String>, error: ProviderError) -> Self {
        Self::new(source, vec![Err(error)])
    }

    /// Sleep this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times [`Provider::call`] has run.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn source(&self) -> &str {
        &self.source
    }

    async fn call(&self, _prompt: &str) -> Result<String, ProviderError> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .get(i)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_else(|| {
                Err(ProviderError::Internal(format!(
                    "ScriptedProvider {} has an empty script",
                    self.source
                )))
            })
    }
}

/// Answers with `"<source>:<prompt>"`, so callers can tell replies apart.
pub struct EchoProvider {
    source: String,
    delay: Duration,
}

impl EchoProvider {
    pub fn new(source: impl Into<String>, delay: Duration) -> Self {
        Self {
            source: source.into(),
            delay,
        }
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn source(&self) -> &str {
        &self.source
    }

    async fn call(&self, prompt: &str) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("{}:{}", self.source, prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_then_repeats_last() {
        let provider = ScriptedProvider::new(
            "A",
            vec![Err(ProviderError::Transport("down".into())), Ok("up".into())],
        );
        assert!(provider.call("x").await.is_err());
        assert_eq!(provider.call("x").await.unwrap(), "up");
        assert_eq!(provider.call("x").await.unwrap(), "up");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn empty_script_reports_internal_error() {
        let provider = ScriptedProvider::new("A", vec![]);
        let err = provider.call("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::Internal(_)));
    }

    #[tokio::test]
    async fn echo_includes_source_and_prompt() {
        let provider = EchoProvider::new("B", Duration::ZERO);
        assert_eq!(provider.call("ping").await.unwrap(), "B:ping");
    }
}
