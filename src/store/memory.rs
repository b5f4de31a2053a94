use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::ResultStore;
use crate::error::StoreError;
use crate::types::{AggregatedResult, TaskState};

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Expiring<T> {
    fn live(&self, now: Instant) -> Option<T> {
        (now < self.expires_at).then(|| self.value.clone())
    }
}

#[derive(Default)]
struct Entries {
    results: HashMap<String, Expiring<AggregatedResult>>,
    states: HashMap<String, Expiring<TaskState>>,
}

/// In-process result store. Expiry follows tokio's clock, so paused-time
/// tests can step past a TTL.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.results.retain(|_, e| now < e.expires_at);
        entries.states.retain(|_, e| now < e.expires_at);
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn put(
        &self,
        task_id: &str,
        result: &AggregatedResult,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl;
        let mut entries = self.lock();
        entries.results.insert(
            task_id.to_string(),
            Expiring {
                value: result.clone(),
                expires_at,
            },
        );
        entries.states.insert(
            task_id.to_string(),
            Expiring {
                value: TaskState::Completed,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<AggregatedResult>, StoreError> {
        let now = Instant::now();
        Ok(self.lock().results.get(task_id).and_then(|e| e.live(now)))
    }

    async fn set_state(
        &self,
        task_id: &str,
        state: TaskState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.lock().states.insert(
            task_id.to_string(),
            Expiring {
                value: state,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn state(&self, task_id: &str) -> Result<Option<TaskState>, StoreError> {
        let now = Instant::now();
        Ok(self.lock().states.get(task_id).and_then(|e| e.live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderCallResult;

    fn sample() -> AggregatedResult {
        AggregatedResult {
            results: vec![ProviderCallResult::success("A", "pong")],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store.put("t1", &sample(), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get("t1").await.unwrap(), Some(sample()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("t1").await.unwrap(), None);
        assert_eq!(store.state("t1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_entries() {
        let store = MemoryStore::new();
        store.put("old", &sample(), Duration::from_secs(1)).await.unwrap();
        store.put("new", &sample(), Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        store.purge_expired();
        let entries = store.lock();
        assert!(!entries.results.contains_key("old"));
        assert!(entries.results.contains_key("new"));
    }
}
