use std::time::Duration;

use chorus::error::ProviderError;
use chorus::store::{MemoryStore, ResultStore, SqliteStore};
use chorus::types::{AggregatedResult, ProviderCallResult, TaskState};

const TTL: Duration = Duration::from_secs(3600);

fn sample() -> AggregatedResult {
    AggregatedResult {
        results: vec![
            ProviderCallResult::success("A", "hello"),
            ProviderCallResult::success("B", "world"),
            ProviderCallResult::failure("C", ProviderError::Transport("refused".into())),
        ],
    }
}

/// The lifecycle every backend must follow.
async fn exercise(store: &dyn ResultStore) {
    assert_eq!(store.get("t1").await.unwrap(), None);
    assert_eq!(store.state("t1").await.unwrap(), None);

    store.set_state("t1", TaskState::Queued, TTL).await.unwrap();
    assert_eq!(store.state("t1").await.unwrap(), Some(TaskState::Queued));

    store.set_state("t1", TaskState::Processing, TTL).await.unwrap();
    assert_eq!(store.get("t1").await.unwrap(), None);

    store.put("t1", &sample(), TTL).await.unwrap();
    assert_eq!(store.get("t1").await.unwrap(), Some(sample()));
    assert_eq!(store.state("t1").await.unwrap(), Some(TaskState::Completed));

    // Last write wins, nothing merged.
    let replacement = AggregatedResult {
        results: vec![ProviderCallResult::success("A", "again")],
    };
    store.put("t1", &replacement, TTL).await.unwrap();
    assert_eq!(store.get("t1").await.unwrap(), Some(replacement));

    assert_eq!(store.get("other").await.unwrap(), None);

    // A later state write does not stretch the result's own TTL.
    store
        .put("t2", &sample(), Duration::from_millis(50))
        .await
        .unwrap();
    store.set_state("t2", TaskState::Processing, TTL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(store.get("t2").await.unwrap(), None);
    assert_eq!(store.state("t2").await.unwrap(), Some(TaskState::Processing));
}

#[tokio::test]
async fn memory_store_lifecycle() {
    exercise(&MemoryStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_lifecycle() {
    exercise(&SqliteStore::in_memory().unwrap()).await;
}

#[tokio::test]
async fn sqlite_results_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.put("t1", &sample(), TTL).await.unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.get("t1").await.unwrap(), Some(sample()));
}

#[tokio::test]
async fn sqlite_open_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a").join("b").join("results.db");
    SqliteStore::open(&path).unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn sqlite_entries_expire() {
    let store = SqliteStore::in_memory().unwrap();
    store.put("t1", &sample(), Duration::from_millis(20)).await.unwrap();
    assert!(store.get("t1").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get("t1").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn memory_entries_expire() {
    let store = MemoryStore::new();
    store.put("t1", &sample(), Duration::from_secs(3600)).await.unwrap();

    tokio::time::advance(Duration::from_secs(3599)).await;
    assert!(store.get("t1").await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(store.get("t1").await.unwrap(), None);
}

/// Needs a live Redis: `cargo test --features redis-tests -- redis_`.
#[cfg(feature = "redis-tests")]
#[tokio::test]
async fn redis_store_lifecycle() {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let prefix = format!("chorus-test-{}", uuid::Uuid::new_v4());
    let store = chorus::store::RedisStore::connect(&url, &prefix)
        .await
        .expect("Redis connection failed, is Redis running?");
    exercise(&store).await;
}
