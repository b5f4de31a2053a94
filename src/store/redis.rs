//! Redis result store.
//!
//! | Key | Value |
//! |-----|-------|
//! | `{prefix}:result:{task_id}` | `AggregatedResult` JSON, `PX` ttl |
//! | `{prefix}:state:{task_id}` | `queued` / `processing` / `completed`, `PX` ttl |
//!
//! Expiry is left entirely to Redis.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Script, SetExpiry, SetOptions};
use async_trait::async_trait;

use super::{ResultStore, ttl_millis};
use crate::error::StoreError;
use crate::types::{AggregatedResult, TaskState};

/// Write result and completed state together.
/// KEYS[1] = result key, KEYS[2] = state key, ARGV[1] = json, ARGV[2] = ttl ms.
const LUA_PUT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
redis.call('SET', KEYS[2], 'completed', 'PX', ARGV[2])
return 1
"#;

pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::with_connection(conn, prefix))
    }

    pub fn with_connection(conn: MultiplexedConnection, prefix: &str) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
        }
    }

    fn result_key(&self, task_id: &str) -> String {
        format!("{}:result:{task_id}", self.prefix)
    }

    fn state_key(&self, task_id: &str) -> String {
        format!("{}:state:{task_id}", self.prefix)
    }
}

#[async_trait]
impl ResultStore for RedisStore {
    async fn put(
        &self,
        task_id: &str,
        result: &AggregatedResult,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(result)?;
        let script = Script::new(LUA_PUT);
        let _: i64 = script
            .key(self.result_key(task_id))
            .key(self.state_key(task_id))
            .arg(json)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<AggregatedResult>, StoreError> {
        let json: Option<String> = self.conn.clone().get(self.result_key(task_id)).await?;
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
        let options = SetOptions::default().with_expiration(SetExpiry::PX(ttl_millis(ttl)));
        let _: () = self
            .conn
            .clone()
            .set_options(self.state_key(task_id), state.as_str(), options)
            .await?;
        Ok(())
    }

    async fn state(&self, task_id: &str) -> Result<Option<TaskState>, StoreError> {
        let raw: Option<String> = self.conn.clone().get(self.state_key(task_id)).await?;
        raw.map(|raw| {
            raw.parse().map_err(|reason| StoreError::Corrupt {
                task_id: task_id.to_string(),
                reason,
            })
        })
        .transpose()
    }
}
