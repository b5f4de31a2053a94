//! Pulls tasks off the queue, aggregates them and stores the results.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::consts::{
    DEFAULT_MAX_DELIVERIES, DEFAULT_REDELIVERY_DELAY, DEFAULT_REDELIVERY_MAX_DELAY,
    DEFAULT_RESULT_TTL, DEFAULT_WORKER_CONCURRENCY,
};
use crate::error::QueueError;
use crate::queue::{AckMode, Delivery, TaskQueue};
use crate::resilience::{Backoff, RetryPolicy};
use crate::store::ResultStore;
use crate::types::{Prompt, TaskMessage, TaskState};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub result_ttl: Duration,
    /// Tasks processed at once.
    pub concurrency: usize,
    /// Under [`AckMode::AfterStore`], how often a task whose result could
    /// not be stored is delivered in total, and the pause before each
    /// requeue.
    pub redelivery: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            result_ttl: DEFAULT_RESULT_TTL,
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            redelivery: RetryPolicy {
                max_attempts: DEFAULT_MAX_DELIVERIES,
                backoff: Backoff::Exponential {
                    initial: DEFAULT_REDELIVERY_DELAY,
                    max: DEFAULT_REDELIVERY_MAX_DELAY,
                    multiplier: 2.0,
                    jitter: true,
                },
            },
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Result stored.
    Completed,
    /// Payload unusable; acknowledged and discarded.
    Dropped,
    /// Aggregated but the store write failed.
    StoreFailed,
}

/// Counts since the worker started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub received: u64,
    pub completed: u64,
    pub dropped: u64,
    pub store_failures: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
    store_failures: AtomicU64,
}

#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn ResultStore>,
    aggregator: Arc<Aggregator>,
    config: WorkerConfig,
    counters: Arc<Counters>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn ResultStore>,
        aggregator: Arc<Aggregator>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            aggregator,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            received: self.counters.received.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            store_failures: self.counters.store_failures.load(Ordering::Relaxed),
        }
    }

    /// Receive and process tasks until `shutdown` resolves or the queue
    /// closes. Tasks already spawned are left to finish on their own.
    pub async fn run<S>(&self, shutdown: S) -> Result<WorkerReport, QueueError>
    where
        S: Future<Output = ()>,
    {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        tokio::pin!(shutdown);

        info!(
            ack_mode = %self.queue.ack_mode(),
            concurrency = self.config.concurrency,
            "worker started"
        );

        loop {
            let next = async {
                let permit = Arc::clone(&permits).acquire_owned().await;
                (permit, self.queue.receive().await)
            };

            let (permit, delivery) = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, worker stopping");
                    break;
                }
                (permit, received) = next => match received {
                    Ok(delivery) => (permit, delivery),
                    Err(QueueError::Closed) => {
                        info!("queue closed, worker stopping");
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "queue receive failed");
                        return Err(err);
                    }
                },
            };

            // The semaphore is never closed, so a permit is always granted.
            let Ok(permit) = permit else {
                break;
            };

            let worker = self.clone();
            tokio::spawn(async move {
                worker.process(delivery).await;
                drop(permit);
            });
        }

        let report = self.report();
        info!(
            received = report.received,
            completed = report.completed,
            dropped = report.dropped,
            store_failures = report.store_failures,
            "worker stopped"
        );
        Ok(report)
    }

    /// Handle one delivery end to end, including its ack or requeue.
    pub async fn process(&self, delivery: Delivery) -> TaskOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let ack_mode = self.queue.ack_mode();

        let task = match delivery.decode() {
            Ok(task) => task,
            Err(err) => {
                warn!(error = %err, "dropping malformed task payload");
                return self.drop_delivery(&delivery).await;
            }
        };

        let prompt = match Prompt::new(task.prompt.as_str()) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(task_id = %task.task_id, error = %err, "dropping task");
                return self.drop_delivery(&delivery).await;
            }
        };

        debug!(task_id = %task.task_id, "processing task");
        if let Err(err) = self
            .store
            .set_state(&task.task_id, TaskState::Processing, self.config.result_ttl)
            .await
        {
            warn!(task_id = %task.task_id, error = %err, "failed to record processing state");
        }

        let result = self.aggregator.merged_results(&prompt).await;

        match self
            .store
            .put(&task.task_id, &result, self.config.result_ttl)
            .await
        {
            Ok(()) => {
                if let Err(err) = self.queue.ack(&delivery).await {
                    warn!(task_id = %task.task_id, error = %err, "failed to ack stored task");
                }
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    task_id = %task.task_id,
                    failures = result.failures().count(),
                    "task completed"
                );
                TaskOutcome::Completed
            }
            Err(err) => {
                error!(task_id = %task.task_id, error = %err, "failed to store result");
                self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
                if ack_mode == AckMode::AfterStore {
                    self.redeliver(&delivery, &task).await;
                }
                TaskOutcome::StoreFailed
            }
        }
    }

    async fn drop_delivery(&self, delivery: &Delivery) -> TaskOutcome {
        if let Err(err) = self.queue.ack(delivery).await {
            warn!(error = %err, "failed to ack dropped task");
        }
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        TaskOutcome::Dropped
    }

    /// Requeue a task whose result could not be stored after a backoff, or
    /// ack and drop it once it has used up its deliveries.
    async fn redeliver(&self, delivery: &Delivery, task: &TaskMessage) {
        let policy = &self.config.redelivery;
        let next = task.redelivered();

        if next.redeliveries >= policy.max_attempts.max(1) {
            error!(
                task_id = %task.task_id,
                deliveries = next.redeliveries,
                "giving up on task after repeated store failures"
            );
            if let Err(err) = self.queue.ack(delivery).await {
                warn!(task_id = %task.task_id, error = %err, "failed to ack abandoned task");
            }
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let delay = policy.delay_for(next.redeliveries);
        debug!(
            task_id = %task.task_id,
            redelivery = next.redeliveries,
            ?delay,
            "requeueing task"
        );
        tokio::time::sleep(delay).await;
        if let Err(err) = self.queue.requeue(delivery, &next).await {
            warn!(task_id = %task.task_id, error = %err, "failed to requeue task");
        }
    }
}

/// Record a new task as queued and publish it. Returns the published task.
pub async fn submit(
    queue: &dyn TaskQueue,
    store: &dyn ResultStore,
    prompt: &Prompt,
    ttl: Duration,
) -> Result<TaskMessage, QueueError> {
    let task = TaskMessage::new(prompt);
    if let Err(err) = store.set_state(&task.task_id, TaskState::Queued, ttl).await {
        warn!(task_id = %task.task_id, error = %err, "failed to record queued state");
    }
    queue.publish(&task).await?;
    info!(task_id = %task.task_id, "task queued");
    Ok(task)
}
