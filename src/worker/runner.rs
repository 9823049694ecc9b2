//! Worker loop - leases, handles and settles one task at a time

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::WorkerConfig;
use crate::queue::{QueueError, TaskBroker, TaskEnvelope};
use crate::tasks::{HandlerError, HandlerRegistry, TaskContext};

const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// A single consumer bound to one queue
pub struct Worker {
    id: String,
    queue: String,
    broker: Arc<TaskBroker>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        broker: Arc<TaskBroker>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            broker,
            registry,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Consume until `shutdown` flips to true
    ///
    /// A task already leased is finished and settled before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        self.broker.register_worker(&self.id, &self.queue)?;
        info!(worker_id = %self.id, queue = %self.queue, "Worker started");

        let min_gap = self.config.min_task_gap();
        let mut last_start: Option<Instant> = None;

        while !*shutdown.borrow() {
            if let (Some(gap), Some(last)) = (min_gap, last_start) {
                tokio::select! {
                    _ = tokio::time::sleep_until(last + gap) => {}
                    _ = shutdown.changed() => continue,
                }
            }

            self.broker.heartbeat(&self.id)?;

            match self.broker.reserve(&self.id).await? {
                Some(envelope) => {
                    last_start = Some(Instant::now());
                    self.process(envelope).await?;
                }
                None => {
                    tokio::select! {
                        _ = self.broker.wait_for_task(&self.queue, self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        self.broker.deregister_worker(&self.id).await?;
        info!(worker_id = %self.id, "Worker stopped");
        Ok(())
    }

    async fn process(&self, envelope: TaskEnvelope) -> Result<(), QueueError> {
        let seq = envelope.seq;
        let task_id = envelope.task.task_id.clone();
        let attempt = envelope.task.attempt;

        let handler = match self.registry.get(&task_id) {
            Ok(handler) => handler,
            Err(e) => {
                error!(worker_id = %self.id, seq, task_id = %task_id, "No handler registered");
                return self
                    .broker
                    .dead_letter(&self.id, seq, "NO_HANDLER", &e.to_string())
                    .await;
            }
        };

        let ctx = TaskContext {
            seq,
            queue: envelope.queue,
            worker_id: self.id.clone(),
            task: envelope.task,
        };

        debug!(worker_id = %self.id, seq, task_id = %task_id, attempt, "Processing task");

        let outcome = {
            let handling = handler.handle(&ctx);
            tokio::pin!(handling);
            let mut beat = tokio::time::interval(self.config.heartbeat_interval.max(MIN_HEARTBEAT));
            beat.tick().await;

            loop {
                tokio::select! {
                    outcome = &mut handling => break outcome,
                    _ = beat.tick() => {
                        let _ = self.broker.heartbeat(&self.id);
                    }
                }
            }
        };

        self.settle(seq, &task_id, attempt, outcome).await
    }

    async fn settle(
        &self,
        seq: u64,
        task_id: &str,
        attempt: u32,
        outcome: Result<(), HandlerError>,
    ) -> Result<(), QueueError> {
        match outcome {
            Ok(()) => {
                self.broker.ack(&self.id, seq).await?;
                info!(worker_id = %self.id, seq, task_id, attempt, "Task completed");
            }
            Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                warn!(worker_id = %self.id, seq, task_id, attempt, error = %e, "Task failed, requeueing");
                self.broker.requeue(&self.id, seq).await?;
            }
            Err(e) => {
                error!(worker_id = %self.id, seq, task_id, attempt, error = %e, "Task failed permanently");
                self.broker
                    .dead_letter(&self.id, seq, e.code(), &e.to_string())
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Metrics;
    use crate::queue::{Broker, FjallQueue, TaskMessage};
    use crate::tasks::TaskHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::RwLock;

    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, _ctx: &TaskContext) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err(HandlerError::Retryable(format!("call {call} failed")))
            }
        }
    }

    fn setup(handler: Arc<dyn TaskHandler>, max_retries: u32) -> (Arc<TaskBroker>, Worker, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let queue = Arc::new(RwLock::new(FjallQueue::open(temp_dir.path()).unwrap()));
        let broker = Arc::new(TaskBroker::new(
            queue,
            1,
            Duration::from_secs(30),
            Arc::new(Metrics::new()),
        ));

        let mut registry = HandlerRegistry::new();
        registry.register("downloads.cleanup_old_files", handler);

        let config = WorkerConfig {
            max_retries,
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        };
        let worker = Worker::new("cleanup-0", "cleanup", broker.clone(), Arc::new(registry), config);
        (broker, worker, temp_dir)
    }

    async fn run_until_drained(broker: &Arc<TaskBroker>, worker: Worker) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        for _ in 0..200 {
            if broker.depth("cleanup").await.unwrap() == 0
                && broker.active_workers().await.unwrap().iter().all(|w| w.inflight == 0)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_retryable_failure_is_redelivered_then_acked() {
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 2,
        });
        let (broker, worker, _temp) = setup(handler.clone(), 3);
        broker
            .submit("cleanup", TaskMessage::new("downloads.cleanup_old_files", json!({})))
            .await
            .unwrap();

        run_until_drained(&broker, worker).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(broker.list_dlq(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_go_to_dlq() {
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
        });
        let (broker, worker, _temp) = setup(handler.clone(), 2);
        broker
            .submit("cleanup", TaskMessage::new("downloads.cleanup_old_files", json!({})))
            .await
            .unwrap();

        run_until_drained(&broker, worker).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        let dlq = broker.list_dlq(10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].1.failure_code, "HANDLER_ERROR");
        assert_eq!(dlq[0].1.attempts, 2);
    }

    #[tokio::test]
    async fn test_unknown_task_is_dead_lettered() {
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let (broker, worker, _temp) = setup(handler, 3);
        broker
            .submit("cleanup", TaskMessage::new("reports.weekly", json!({})))
            .await
            .unwrap();

        run_until_drained(&broker, worker).await;

        let dlq = broker.list_dlq(10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].1.failure_code, "NO_HANDLER");
    }
}
