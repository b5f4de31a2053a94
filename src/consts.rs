//! Project-wide defaults.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_HUGGINGFACE_URL: &str =
    "https://api-inference.huggingface.co/models/mixtral/mixtral-8x7b";
pub const DEFAULT_GEMINI_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent";

/// Per-request HTTP timeout for a provider call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Total attempts per provider call, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long a stored result stays visible.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Prefix for every Redis key the pipeline touches.
pub const DEFAULT_KEY_PREFIX: &str = "chorus";

pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Deliveries of one task, including the first, before a worker stops
/// requeueing it after store failures.
pub const DEFAULT_MAX_DELIVERIES: u32 = 3;
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_REDELIVERY_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Longest provider error body kept in a [`ProviderError::Status`](crate::error::ProviderError).
pub const MAX_ERROR_BODY: usize = 512;

/// Default SQLite result store: `~/.chorus/results.db`, or the working
/// directory when there is no home.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".chorus").join("results.db"))
        .unwrap_or_else(|| PathBuf::from("chorus-results.db"))
}

/// Cut `text` to at most `max` bytes on a char boundary, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
