use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{AckMode, Delivery, TaskQueue};
use crate::error::QueueError;
use crate::types::TaskMessage;

/// In-process queue. Backs the embedded worker in `chorus serve` and the
/// pipeline tests. Lost on exit.
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    ack_mode: AckMode,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<Vec<u8>>,
    unacked: HashMap<u64, Vec<u8>>,
    next_tag: u64,
    closed: bool,
}

impl MemoryQueue {
    pub fn new(ack_mode: AckMode) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            ack_mode,
        }
    }

    /// Enqueue bytes as-is, without going through [`TaskMessage`].
    pub fn publish_raw(&self, payload: Vec<u8>) {
        self.lock().ready.push_back(payload);
        self.notify.notify_one();
    }

    /// Stop accepting work. Consumers drain what is left, then get
    /// [`QueueError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Deliveries waiting to be received.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliveries received but not yet acked or requeued.
    pub fn in_flight(&self) -> usize {
        self.lock().unacked.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_take(&self) -> Option<Result<Delivery, QueueError>> {
        let mut inner = self.lock();
        match inner.ready.pop_front() {
            Some(payload) => {
                let tag = match self.ack_mode {
                    AckMode::OnDelivery => None,
                    AckMode::AfterStore => {
                        inner.next_tag += 1;
                        let tag = inner.next_tag;
                        inner.unacked.insert(tag, payload.clone());
                        Some(tag)
                    }
                };
                Some(Ok(Delivery { payload, tag }))
            }
            None if inner.closed => Some(Err(QueueError::Closed)),
            None => None,
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn publish(&self, task: &TaskMessage) -> Result<(), QueueError> {
        if self.lock().closed {
            return Err(QueueError::Closed);
        }
        let payload = serde_json::to_vec(task)?;
        self.publish_raw(payload);
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking, so a publish in between is not missed.
            notified.as_mut().enable();

            if let Some(result) = self.try_take() {
                return result;
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if let Some(tag) = delivery.tag {
            self.lock().unacked.remove(&tag);
        }
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, task: &TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(task)?;
        let mut inner = self.lock();
        if let Some(tag) = delivery.tag {
            inner.unacked.remove(&tag);
        }
        inner.ready.push_front(payload);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }
}
