//! Error kinds for each layer of the pipeline.
//!
//! Provider failures are values: they travel inside
//! [`ProviderCallResult`](crate::types::ProviderCallResult) and never abort an
//! aggregation. Queue and store errors are infrastructure failures and are
//! surfaced to whoever drives the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A prompt was missing or blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("prompt must not be empty")]
pub struct ValidationError;

/// Why a single provider call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("http error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("malformed response: {0}")]
    Serialization(String),

    #[error("circuit breaker is open for {0}")]
    CircuitOpen(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Transport trouble, timeouts, 5xx, 408 and 429 are worth another
    /// attempt. Everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            Self::Serialization(_) | Self::CircuitOpen(_) | Self::Internal(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Failures talking to the task queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("queue closed")]
    Closed,
}

/// Failures talking to the result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialize stored entry: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt entry for {task_id}: {reason}")]
    Corrupt { task_id: String, reason: String },
}
