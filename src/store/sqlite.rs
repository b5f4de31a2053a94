use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::{ResultStore, ttl_millis};
use crate::error::StoreError;
use crate::types::{AggregatedResult, TaskState};

/// SQLite-backed result store for single-host deployments without Redis.
/// A task's result and its state expire independently. Expired values are
/// filtered on read, and rows with nothing live left are purged on write.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS task_entries (
                task_id           TEXT PRIMARY KEY,
                state             TEXT NOT NULL,
                state_expires_at  INTEGER NOT NULL,
                result            TEXT,
                result_expires_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS task_entries_state_expires_at
                ON task_entries (state_expires_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Delete rows whose state and result have both expired. Returns how
    /// many went.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let removed = self.lock().execute(
            "DELETE FROM task_entries
             WHERE state_expires_at <= ?1
               AND (result_expires_at IS NULL OR result_expires_at <= ?1)",
            [now_millis()],
        )?;
        Ok(removed)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn expiry(ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl)
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn put(
        &self,
        task_id: &str,
        result: &AggregatedResult,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(result)?;
        self.purge_expired()?;
        let expires_at = expiry(ttl);
        self.lock().execute(
            "INSERT INTO task_entries
                (task_id, state, state_expires_at, result, result_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                state = excluded.state,
                state_expires_at = excluded.state_expires_at,
                result = excluded.result,
                result_expires_at = excluded.result_expires_at",
            params![task_id, TaskState::Completed.as_str(), expires_at, json],
        )?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<AggregatedResult>, StoreError> {
        let json: Option<String> = self
            .lock()
            .query_row(
                "SELECT result FROM task_entries
                 WHERE task_id = ?1 AND result_expires_at > ?2",
                params![task_id, now_millis()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        json.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn set_state(
        &self,
        task_id: &str,
        state: TaskState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        // State updates never touch a stored result or its expiry.
        self.lock().execute(
            "INSERT INTO task_entries (task_id, state, state_expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                state = excluded.state,
                state_expires_at = excluded.state_expires_at",
            params![task_id, state.as_str(), expiry(ttl)],
        )?;
        Ok(())
    }

    async fn state(&self, task_id: &str) -> Result<Option<TaskState>, StoreError> {
        let raw: Option<String> = self
            .lock()
            .query_row(
                "SELECT state FROM task_entries WHERE task_id = ?1 AND state_expires_at > ?2",
                params![task_id, now_millis()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|raw| {
            raw.parse().map_err(|reason| StoreError::Corrupt {
                task_id: task_id.to_string(),
                reason,
            })
        })
        .transpose()
    }
}
