//! Data that flows between providers, the aggregator and the task pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ValidationError};

/// User-supplied prompt text. Never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn new(text: impl Into<String>) -> Result<Self, ValidationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError);
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Prompt {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What one provider produced. Errors are information, not failures.
///
/// Serialized flat, so the wire shape is `{"source", "message"}` or
/// `{"source", "error"}` and never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Message(String),
    Error(ProviderError),
}

/// Outcome of calling a single provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCallResult {
    pub source: String,
    #[serde(flatten)]
    pub outcome: CallOutcome,
}

impl ProviderCallResult {
    pub fn success(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            outcome: CallOutcome::Message(message.into()),
        }
    }

    pub fn failure(source: impl Into<String>, error: ProviderError) -> Self {
        Self {
            source: source.into(),
            outcome: CallOutcome::Error(error),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            CallOutcome::Message(text) => Some(text),
            CallOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ProviderError> {
        match &self.outcome {
            CallOutcome::Message(_) => None,
            CallOutcome::Error(err) => Some(err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CallOutcome::Message(_))
    }
}

impl fmt::Display for ProviderCallResult {
    /// One line per provider, as printed by the CLI.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            CallOutcome::Message(text) => write!(f, "{}: {}", self.source, text),
            CallOutcome::Error(err) => write!(f, "{} failed: {}", self.source, err),
        }
    }
}

/// Every configured provider's outcome for one prompt, sorted by source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub results: Vec<ProviderCallResult>,
}

impl AggregatedResult {
    pub fn successes(&self) -> impl Iterator<Item = &ProviderCallResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProviderCallResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn get(&self, source: &str) -> Option<&ProviderCallResult> {
        self.results.iter().find(|r| r.source == source)
    }
}

/// A unit of asynchronous work as it travels through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub prompt: String,
    pub task_id: String,
    /// Times a worker has put this task back after failing to store its
    /// result. Absent on the wire until the first requeue.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub redeliveries: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl TaskMessage {
    /// Mint a fresh task id for `prompt`.
    pub fn new(prompt: &Prompt) -> Self {
        Self {
            prompt: prompt.as_str().to_string(),
            task_id: uuid::Uuid::new_v4().to_string(),
            redeliveries: 0,
        }
    }

    /// The same task, marked as handed back once more.
    pub fn redelivered(&self) -> Self {
        Self {
            redeliveries: self.redeliveries + 1,
            ..self.clone()
        }
    }
}

/// Where a task is in its lifecycle. There is no failed state: a task that
/// never completes stays at `Processing` until it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Processing,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}
