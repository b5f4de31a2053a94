//! Redis list queue.
//!
//! | Key | Role |
//! |-----|------|
//! | `{prefix}:queue` | Pending payloads. Producers `LPUSH`, consumers pop from the right. |
//! | `{prefix}:processing` | Payloads received under [`AckMode::AfterStore`] and not yet acked. |
//!
//! Consumers poll with a non-blocking pop rather than `BRPOP`: a blocking
//! command would stall every other request sharing the multiplexed
//! connection.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use tracing::debug;

use super::{AckMode, Delivery, TaskQueue};
use crate::error::QueueError;
use crate::types::TaskMessage;

/// Pop one payload, optionally parking it in the processing list.
/// KEYS[1] = queue, KEYS[2] = processing (may be empty string for no parking).
const LUA_POP: &str = r#"
local payload = redis.call('RPOP', KEYS[1])
if not payload then
    return false
end
if KEYS[2] ~= '' then
    redis.call('LPUSH', KEYS[2], payload)
end
return payload
"#;

/// Drop one copy of a parked payload and push its replacement onto the
/// consuming end of the queue.
/// KEYS[1] = processing, KEYS[2] = queue, ARGV[1] = parked, ARGV[2] = replacement.
const LUA_REQUEUE: &str = r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('RPUSH', KEYS[2], ARGV[2])
return 1
"#;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct RedisQueue {
    conn: MultiplexedConnection,
    queue_key: String,
    processing_key: String,
    ack_mode: AckMode,
    poll_interval: Duration,
}

impl RedisQueue {
    pub async fn connect(url: &str, prefix: &str, ack_mode: AckMode) -> Result<Self, QueueError> {
        let client = ::redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::with_connection(conn, prefix, ack_mode))
    }

    pub fn with_connection(conn: MultiplexedConnection, prefix: &str, ack_mode: AckMode) -> Self {
        Self {
            conn,
            queue_key: format!("{prefix}:queue"),
            processing_key: format!("{prefix}:processing"),
            ack_mode,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How long an idle consumer waits between pops.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let parking = match self.ack_mode {
            AckMode::OnDelivery => "",
            AckMode::AfterStore => self.processing_key.as_str(),
        };
        let payload: Option<Vec<u8>> = Script::new(LUA_POP)
            .key(&self.queue_key)
            .key(parking)
            .invoke_async(&mut self.conn.clone())
            .await?;
        Ok(payload)
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn publish(&self, task: &TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(task)?;
        let _: i64 = self.conn.clone().lpush(&self.queue_key, payload).await?;
        debug!(task_id = %task.task_id, queue = %self.queue_key, "task published");
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        loop {
            if let Some(payload) = self.pop().await? {
                let tag = match self.ack_mode {
                    AckMode::OnDelivery => None,
                    AckMode::AfterStore => Some(0),
                };
                return Ok(Delivery { payload, tag });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if delivery.tag.is_none() {
            return Ok(());
        }
        let _: i64 = self
            .conn
            .clone()
            .lrem(&self.processing_key, 1, delivery.payload.as_slice())
            .await?;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, task: &TaskMessage) -> Result<(), QueueError> {
        let replacement = serde_json::to_vec(task)?;
        let _: i64 = Script::new(LUA_REQUEUE)
            .key(&self.processing_key)
            .key(&self.queue_key)
            .arg(delivery.payload.as_slice())
            .arg(replacement)
            .invoke_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }

    fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }
}

/// Run against a live Redis with
/// `cargo test --features redis-tests -- redis_`. `REDIS_URL` overrides the
/// default `redis://127.0.0.1:6379`. Every test uses its own key prefix.
#[cfg(all(test, feature = "redis-tests"))]
mod integration_tests {
    use super::*;
    use crate::types::Prompt;

    async fn test_queue(ack_mode: AckMode) -> (RedisQueue, MultiplexedConnection, String) {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let conn = ::redis::Client::open(url)
            .unwrap()
            .get_multiplexed_async_connection()
            .await
            .expect("Redis connection failed, is Redis running?");
        let prefix = format!("chorus-test-{}", uuid::Uuid::new_v4());
        let queue = RedisQueue::with_connection(conn.clone(), &prefix, ack_mode)
            .with_poll_interval(Duration::from_millis(10));
        (queue, conn, prefix)
    }

    fn task(text: &str) -> TaskMessage {
        TaskMessage::new(&Prompt::new(text).unwrap())
    }

    async fn len(conn: &mut MultiplexedConnection, key: String) -> i64 {
        conn.llen(key).await.unwrap()
    }

    #[tokio::test]
    async fn redis_on_delivery_is_fifo_and_parks_nothing() {
        let (queue, mut conn, prefix) = test_queue(AckMode::OnDelivery).await;
        let first = task("one");
        let second = task("two");
        queue.publish(&first).await.unwrap();
        queue.publish(&second).await.unwrap();
        assert_eq!(len(&mut conn, format!("{prefix}:queue")).await, 2);

        let delivery = queue.receive().await.unwrap();
        assert_eq!(delivery.tag, None);
        assert_eq!(delivery.decode().unwrap(), first);
        assert_eq!(queue.receive().await.unwrap().decode().unwrap(), second);

        assert_eq!(len(&mut conn, format!("{prefix}:queue")).await, 0);
        assert_eq!(len(&mut conn, format!("{prefix}:processing")).await, 0);
    }

    #[tokio::test]
    async fn redis_after_store_parks_until_ack() {
        let (queue, mut conn, prefix) = test_queue(AckMode::AfterStore).await;
        queue.publish(&task("x")).await.unwrap();

        let delivery = queue.receive().await.unwrap();
        assert!(delivery.tag.is_some());
        assert_eq!(len(&mut conn, format!("{prefix}:processing")).await, 1);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(len(&mut conn, format!("{prefix}:processing")).await, 0);
        assert_eq!(len(&mut conn, format!("{prefix}:queue")).await, 0);
    }

    #[tokio::test]
    async fn redis_requeue_replaces_parked_payload_at_the_front() {
        let (queue, mut conn, prefix) = test_queue(AckMode::AfterStore).await;
        let first = task("one");
        queue.publish(&first).await.unwrap();
        queue.publish(&task("two")).await.unwrap();

        let delivery = queue.receive().await.unwrap();
        let again = delivery.decode().unwrap().redelivered();
        queue.requeue(&delivery, &again).await.unwrap();
        assert_eq!(len(&mut conn, format!("{prefix}:processing")).await, 0);

        let next = queue.receive().await.unwrap();
        assert_eq!(next.decode().unwrap(), again);
        assert_eq!(next.decode().unwrap().task_id, first.task_id);

        queue.ack(&next).await.unwrap();
        queue.receive().await.unwrap();
    }

    #[tokio::test]
    async fn redis_receive_waits_for_publish() {
        let (queue, _conn, _prefix) = test_queue(AckMode::OnDelivery).await;
        let queue = std::sync::Arc::new(queue);
        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = task("late");
        queue.publish(&sent).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.decode().unwrap(), sent);
    }
}
