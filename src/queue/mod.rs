//! Task queue: a FIFO of [`TaskMessage`] payloads with competing consumers.

pub mod memory;
pub mod redis;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::types::TaskMessage;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// When a delivery is acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// As soon as it is received. A crash mid-task loses the task.
    #[default]
    OnDelivery,
    /// Only once its result is stored. Store failures requeue it.
    AfterStore,
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnDelivery => write!(f, "on-delivery"),
            Self::AfterStore => write!(f, "after-store"),
        }
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on-delivery" | "on_delivery" => Ok(Self::OnDelivery),
            "after-store" | "after_store" => Ok(Self::AfterStore),
            other => Err(format!(
                "unknown ack mode {other:?} (expected on-delivery or after-store)"
            )),
        }
    }
}

/// One message handed to a consumer. Raw bytes, so a malformed payload can
/// still be acknowledged and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Vec<u8>,
    /// Backend handle for ack/requeue. `None` when the backend already
    /// acknowledged on receipt.
    pub tag: Option<u64>,
}

impl Delivery {
    pub fn decode(&self) -> Result<TaskMessage, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn publish(&self, task: &TaskMessage) -> Result<(), QueueError>;

    /// Wait for the next delivery. Returns [`QueueError::Closed`] once the
    /// queue will never yield again.
    async fn receive(&self) -> Result<Delivery, QueueError>;

    /// Remove a delivery for good. A no-op under [`AckMode::OnDelivery`].
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Settle `delivery` and put `task` in its place, at the consuming end,
    /// so a consumer sees it next.
    async fn requeue(&self, delivery: &Delivery, task: &TaskMessage) -> Result<(), QueueError>;

    fn ack_mode(&self) -> AckMode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_mode_parses_both_spellings() {
        assert_eq!("after-store".parse::<AckMode>().unwrap(), AckMode::AfterStore);
        assert_eq!("ON_DELIVERY".parse::<AckMode>().unwrap(), AckMode::OnDelivery);
        assert!("never".parse::<AckMode>().is_err());
    }

    #[test]
    fn ack_mode_display_parses_back() {
        for mode in [AckMode::OnDelivery, AckMode::AfterStore] {
            assert_eq!(mode.to_string().parse::<AckMode>().unwrap(), mode);
        }
    }

    #[test]
    fn delivery_decodes_task() {
        let delivery = Delivery {
            payload: br#"{"prompt":"ping","task_id":"t1"}"#.to_vec(),
            tag: None,
        };
        let task = delivery.decode().unwrap();
        assert_eq!(task.task_id, "t1");

        let junk = Delivery {
            payload: b"not json".to_vec(),
            tag: None,
        };
        assert!(junk.decode().is_err());
    }
}
