//! Runtime configuration, read once at start-up from the environment and
//! an optional `.env` file, then handed to constructors by reference.
//!
//! Nothing below `main` reads the environment directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::aggregator::AggregatorConfig;
use crate::consts::{
    DEFAULT_BIND, DEFAULT_GEMINI_URL, DEFAULT_HUGGINGFACE_URL, DEFAULT_KEY_PREFIX,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_OPENAI_URL, DEFAULT_PROVIDER_TIMEOUT, DEFAULT_RESULT_TTL,
    DEFAULT_RETRY_DELAY, DEFAULT_WORKER_CONCURRENCY, default_db_path,
};
use crate::queue::AckMode;
use crate::resilience::{ResilienceConfig, RetryPolicy};

/// The providers this build knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    HuggingFace,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::OpenAi, Self::HuggingFace, Self::Gemini];

    /// Prefix of this provider's `*_API_KEY` / `*_URL` variables.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI",
            Self::HuggingFace => "HUGGINGFACE",
            Self::Gemini => "GEMINI",
        }
    }

    pub fn default_url(&self) -> &'static str {
        match self {
            Self::OpenAi => DEFAULT_OPENAI_URL,
            Self::HuggingFace => DEFAULT_HUGGINGFACE_URL,
            Self::Gemini => DEFAULT_GEMINI_URL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub url: String,
    /// Only meaningful for providers that take a model name in the body.
    pub model: Option<String>,
    pub timeout: Duration,
}

/// Where tasks and results live.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// When set, both the queue and the result store use Redis.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    /// SQLite result store used when there is no Redis.
    pub db_path: PathBuf,
    pub result_ttl: Duration,
    pub ack_mode: AckMode,
    pub worker_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            db_path: default_db_path(),
            result_ttl: DEFAULT_RESULT_TTL,
            ack_mode: AckMode::default(),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Answer 500 when any provider failed instead of 200 with the errors
    /// embedded.
    pub strict_status: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            strict_status: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub providers: Vec<ProviderConfig>,
    pub resilience: ResilienceConfig,
    pub aggregator: AggregatorConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal; anything in it is only a default.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let timeout = parse_or(&get, "CHORUS_TIMEOUT_SECS", DEFAULT_PROVIDER_TIMEOUT.as_secs())
            .map(Duration::from_secs)?;

        let providers = ProviderKind::ALL
            .iter()
            .filter_map(|kind| {
                let prefix = kind.env_prefix();
                let api_key = get(&format!("{prefix}_API_KEY"))?;
                Some(ProviderConfig {
                    kind: *kind,
                    api_key,
                    url: get(&format!("{prefix}_URL"))
                        .unwrap_or_else(|| kind.default_url().to_string()),
                    model: get(&format!("{prefix}_MODEL")),
                    timeout,
                })
            })
            .collect();

        let max_attempts = parse_or(&get, "CHORUS_MAX_RETRIES", DEFAULT_MAX_ATTEMPTS)?;
        let retry_delay = parse_or(
            &get,
            "CHORUS_RETRY_DELAY_MS",
            DEFAULT_RETRY_DELAY.as_millis() as u64,
        )
        .map(Duration::from_millis)?;
        let resilience = ResilienceConfig {
            retry: RetryPolicy::fixed(max_attempts, retry_delay),
            ..ResilienceConfig::default()
        };

        let pipeline = PipelineConfig {
            redis_url: get("REDIS_URL"),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            db_path: get("CHORUS_DB")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            result_ttl: parse_or(&get, "CHORUS_RESULT_TTL_SECS", DEFAULT_RESULT_TTL.as_secs())
                .map(Duration::from_secs)?,
            ack_mode: parse_or(&get, "CHORUS_ACK_MODE", AckMode::default())?,
            worker_concurrency: parse_or(
                &get,
                "CHORUS_WORKER_CONCURRENCY",
                DEFAULT_WORKER_CONCURRENCY,
            )?
            .max(1),
        };

        let server = ServerConfig {
            bind: parse_or(&get, "CHORUS_BIND", default_bind()?)?,
            strict_status: get("CHORUS_STRICT_STATUS")
                .map(|value| parse_flag(&value))
                .transpose()
                .context("invalid CHORUS_STRICT_STATUS")?
                .unwrap_or(false),
        };

        Ok(Self {
            providers,
            resilience,
            aggregator: AggregatorConfig::default(),
            pipeline,
            server,
        })
    }
}

fn default_bind() -> Result<SocketAddr> {
    DEFAULT_BIND
        .parse()
        .with_context(|| format!("invalid default bind address {DEFAULT_BIND}"))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}
