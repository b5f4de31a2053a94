pub mod memory;
pub mod redis;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::types::{AggregatedResult, TaskState};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::sqlite::SqliteStore;

/// Where finished results wait to be picked up. Every entry expires.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store `result` for `task_id`, replacing any earlier one, and mark the
    /// task completed. Both expire after `ttl`.
    async fn put(
        &self,
        task_id: &str,
        result: &AggregatedResult,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// The stored result. `None` for unknown, unfinished and expired tasks
    /// alike; see [`state`](Self::state) to tell those apart.
    async fn get(&self, task_id: &str) -> Result<Option<AggregatedResult>, StoreError>;

    async fn set_state(
        &self,
        task_id: &str,
        state: TaskState,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn state(&self, task_id: &str) -> Result<Option<TaskState>, StoreError>;
}

/// Redis when a URL is configured, otherwise SQLite at the configured path.
pub async fn connect(config: &PipelineConfig) -> Result<Arc<dyn ResultStore>> {
    let store: Arc<dyn ResultStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisStore::connect(url, &config.key_prefix)
                .await
                .context("failed to connect to Redis result store")?,
        ),
        None => Arc::new(SqliteStore::open(&config.db_path).with_context(|| {
            format!("failed to open result store {}", config.db_path.display())
        })?),
    };
    Ok(store)
}

/// Milliseconds for a TTL, never zero so the entry is not stored forever.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_millis_is_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[tokio::test]
    async fn connect_without_redis_uses_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            db_path: dir.path().join("nested").join("results.db"),
            ..PipelineConfig::default()
        };
        let store = connect(&config).await.unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(config.db_path.exists());
    }
}
