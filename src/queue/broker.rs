use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use super::store::{FjallQueue, QueueError, Result, validate_queue_name};
use super::task::{DeadLetterTask, TaskEnvelope, TaskMessage};
use crate::observability::Metrics;

/// A registered consumer, as reported to the workers probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub id: String,
    pub queue: String,
    pub inflight: usize,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// Producer-side view of the broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Durably append `task` to `queue`, returning its sequence number
    async fn submit(&self, queue: &str, task: TaskMessage) -> Result<u64>;

    /// Workers whose heartbeat is still fresh
    async fn active_workers(&self) -> Result<Vec<WorkerInfo>>;
}

#[derive(Debug, Clone)]
struct WorkerRecord {
    queue: String,
    registered_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
}

/// TaskBroker hands persisted tasks to pull-based workers
///
/// Architecture:
/// 1. Producers call `submit(queue, task)`
/// 2. Broker persists the task to FjallQueue and wakes one waiter of that queue
/// 3. Workers `reserve` one task at a time (prefetch), holding a lease
/// 4. Workers `ack` after the handler succeeds, or `requeue`/`dead_letter`
/// 5. A lost worker's leases return to the head of their queues
///
/// Nothing is removed from the store before it is acknowledged, so a task is
/// delivered at least once.
pub struct TaskBroker {
    queue: Arc<RwLock<FjallQueue>>,
    notifiers: DashMap<String, Arc<Notify>>,
    workers: DashMap<String, WorkerRecord>,
    prefetch: usize,
    heartbeat_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl TaskBroker {
    pub fn new(
        queue: Arc<RwLock<FjallQueue>>,
        prefetch: usize,
        heartbeat_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        info!(prefetch, heartbeat_ttl_secs = heartbeat_ttl.as_secs(), "Creating TaskBroker");

        Self {
            queue,
            notifiers: DashMap::new(),
            workers: DashMap::new(),
            prefetch: prefetch.max(1),
            heartbeat_ttl,
            metrics,
        }
    }

    /// Return every lease left over from a previous process to its queue
    pub async fn recover(&self) -> Result<usize> {
        let recovered = self.queue.write().await.requeue_all_inflight()?;
        if recovered > 0 {
            for notifier in self.notifiers.iter() {
                notifier.notify_waiters();
            }
        }
        Ok(recovered)
    }

    pub fn register_worker(&self, worker_id: &str, queue: &str) -> Result<()> {
        validate_queue_name(queue)?;
        let now = Utc::now();
        self.workers.insert(
            worker_id.to_string(),
            WorkerRecord {
                queue: queue.to_string(),
                registered_at: now,
                last_heartbeat: now,
            },
        );
        info!(worker_id, queue, "Worker registered");
        Ok(())
    }

    pub fn heartbeat(&self, worker_id: &str) -> Result<()> {
        let mut record = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| QueueError::UnknownWorker(worker_id.to_string()))?;
        record.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Graceful exit; anything still leased goes back to the queue
    pub async fn deregister_worker(&self, worker_id: &str) -> Result<()> {
        self.workers.remove(worker_id);
        let requeued = self.queue.write().await.requeue_worker(worker_id)?;
        self.wake(requeued.iter().map(|(_, queue)| queue.as_str()));
        info!(worker_id, "Worker deregistered");
        Ok(())
    }

    /// Lease the next task of the worker's queue
    ///
    /// Fails with [`QueueError::PrefetchExceeded`] when the worker already
    /// holds `prefetch` unacknowledged tasks.
    pub async fn reserve(&self, worker_id: &str) -> Result<Option<TaskEnvelope>> {
        let queue_name = self
            .workers
            .get(worker_id)
            .map(|record| record.queue.clone())
            .ok_or_else(|| QueueError::UnknownWorker(worker_id.to_string()))?;

        let envelope = {
            let queue = self.queue.write().await;
            let inflight = queue.inflight_for(worker_id)?;
            if inflight >= self.prefetch {
                return Err(QueueError::PrefetchExceeded {
                    worker_id: worker_id.to_string(),
                    inflight,
                    prefetch: self.prefetch,
                });
            }
            queue.reserve(&queue_name, worker_id)?
        };

        if envelope.is_some() {
            if let Err(e) = self.heartbeat(worker_id) {
                warn!(worker_id, error = %e, "Failed to refresh heartbeat after reserve");
            }
        }
        Ok(envelope)
    }

    pub async fn ack(&self, worker_id: &str, seq: u64) -> Result<()> {
        self.queue.write().await.ack(seq, worker_id)?;
        self.metrics.task_acked();
        Ok(())
    }

    /// Put a leased task back for redelivery
    pub async fn requeue(&self, worker_id: &str, seq: u64) -> Result<()> {
        let queue = self.queue.write().await.requeue(seq, worker_id)?;
        self.metrics.task_requeued();
        self.wake([queue.as_str()]);
        Ok(())
    }

    pub async fn dead_letter(
        &self,
        worker_id: &str,
        seq: u64,
        failure_code: &str,
        failure_message: &str,
    ) -> Result<()> {
        self.queue
            .write()
            .await
            .move_to_dlq(seq, worker_id, failure_code, failure_message)?;
        self.metrics.task_dead_lettered();
        Ok(())
    }

    /// Forget a vanished worker and requeue everything it held
    pub async fn worker_lost(&self, worker_id: &str) -> Result<usize> {
        self.workers.remove(worker_id);
        let requeued = self.queue.write().await.requeue_worker(worker_id)?;
        self.metrics.worker_lost();
        for _ in &requeued {
            self.metrics.task_requeued();
        }
        self.wake(requeued.iter().map(|(_, queue)| queue.as_str()));
        warn!(worker_id, requeued = requeued.len(), "Worker lost");
        Ok(requeued.len())
    }

    /// Treat workers with an expired heartbeat as lost
    pub async fn reap_stale_workers(&self) -> Result<Vec<String>> {
        let cutoff = self.heartbeat_cutoff();
        let stale: Vec<String> = self
            .workers
            .iter()
            .filter(|entry| entry.last_heartbeat < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        for worker_id in &stale {
            self.worker_lost(worker_id).await?;
        }
        Ok(stale)
    }

    /// Wait until `queue` may have work, or `timeout` elapses
    pub async fn wait_for_task(&self, queue: &str, timeout: Duration) {
        let notifier = self.notifier(queue);
        let _ = tokio::time::timeout(timeout, notifier.notified()).await;
    }

    pub async fn depth(&self, queue: &str) -> Result<usize> {
        self.queue.read().await.depth(queue)
    }

    pub async fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetterTask)>> {
        self.queue.read().await.list_dlq(limit)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.queue.read().await.health_check()
    }

    pub async fn flush(&self) -> Result<()> {
        self.queue.read().await.flush()
    }

    fn notifier(&self, queue: &str) -> Arc<Notify> {
        self.notifiers
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn wake<'a>(&self, queues: impl IntoIterator<Item = &'a str>) {
        for queue in queues {
            self.notifier(queue).notify_one();
        }
    }

    /// Heartbeats older than this are expired
    fn heartbeat_cutoff(&self) -> DateTime<Utc> {
        let now = Utc::now();
        chrono::Duration::from_std(self.heartbeat_ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[async_trait]
impl Broker for TaskBroker {
    async fn submit(&self, queue: &str, task: TaskMessage) -> Result<u64> {
        let seq = {
            let store = self.queue.write().await;
            store.enqueue(queue, &task)?
        };

        debug!(seq, queue, task_id = %task.task_id, "Task persisted to queue");

        self.wake([queue]);
        Ok(seq)
    }

    async fn active_workers(&self) -> Result<Vec<WorkerInfo>> {
        let cutoff = self.heartbeat_cutoff();
        let records: Vec<(String, WorkerRecord)> = self
            .workers
            .iter()
            .filter(|entry| entry.last_heartbeat >= cutoff)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let queue = self.queue.read().await;
        let mut workers = Vec::with_capacity(records.len());
        for (id, record) in records {
            workers.push(WorkerInfo {
                inflight: queue.inflight_for(&id)?,
                id,
                queue: record.queue,
                registered_at: record.registered_at,
                last_heartbeat: record.last_heartbeat,
            });
        }
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }
}
