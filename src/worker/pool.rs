//! Supervisor for the per-queue workers

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use super::WorkerConfig;
use super::runner::Worker;
use crate::queue::{QueueError, TaskBroker};
use crate::tasks::HandlerRegistry;

#[derive(Debug, Clone)]
struct Slot {
    queue: String,
    index: usize,
    generation: u64,
    /// Consecutive short-lived workers in this slot
    deaths: u32,
    started: Instant,
}

impl Slot {
    fn worker_id(&self) -> String {
        format!("{}-{}-g{}", self.queue, self.index, self.generation)
    }
}

/// Runs every configured worker and replaces those that die
///
/// A worker that panics or errors out is reported to the broker as lost,
/// which requeues whatever it held, and a fresh worker takes its slot.
/// Slots whose workers keep dying are refilled with exponential backoff.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

impl WorkerPool {
    pub fn start(
        broker: Arc<TaskBroker>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(broker, registry, config, shutdown_rx));
        Self {
            shutdown_tx,
            supervisor,
        }
    }

    /// Signal every worker to stop after its current task and wait
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.supervisor.await {
            warn!("Error waiting for worker pool to stop: {}", e);
        }
    }
}

async fn supervise(
    broker: Arc<TaskBroker>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();
    let mut slots = HashMap::new();
    let worker_shutdown = shutdown_rx.clone();

    let spawn = |workers: &mut JoinSet<Result<(), QueueError>>,
                 slots: &mut HashMap<tokio::task::Id, Slot>,
                 slot: Slot,
                 delay: Duration| {
        let worker = Worker::new(
            slot.worker_id(),
            slot.queue.clone(),
            broker.clone(),
            registry.clone(),
            config.clone(),
        );
        let mut shutdown = worker_shutdown.clone();
        let handle = workers.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return Ok(()),
                }
            }
            worker.run(shutdown).await
        });
        slots.insert(
            handle.id(),
            Slot {
                started: Instant::now() + delay,
                ..slot
            },
        );
    };

    for pool in &config.pools {
        for index in 0..pool.concurrency {
            spawn(
                &mut workers,
                &mut slots,
                Slot {
                    queue: pool.queue.clone(),
                    index,
                    generation: 0,
                    deaths: 0,
                    started: Instant::now(),
                },
                Duration::ZERO,
            );
        }
    }
    info!(workers = workers.len(), pools = config.pools.len(), "Worker pool started");

    let mut reaper = tokio::time::interval(config.heartbeat_ttl.max(config.poll_interval));

    loop {
        tokio::select! {
            joined = workers.join_next_with_id() => {
                let Some(joined) = joined else { break };

                let (id, failure) = match joined {
                    Ok((id, Ok(()))) => (id, None),
                    Ok((id, Err(e))) => (id, Some(e.to_string())),
                    Err(join_error) => (join_error.id(), Some(join_error.to_string())),
                };
                let Some(slot) = slots.remove(&id) else { continue };

                if *shutdown_rx.borrow() {
                    continue;
                }

                let worker_id = slot.worker_id();
                let deaths = if slot.started.elapsed() >= config.max_restart_backoff {
                    1
                } else {
                    slot.deaths.saturating_add(1)
                };
                let delay = config.restart_delay(deaths);
                error!(
                    worker_id = %worker_id,
                    reason = failure.as_deref().unwrap_or("exited"),
                    deaths,
                    restart_in_ms = delay.as_millis() as u64,
                    "Worker died"
                );
                if let Err(e) = broker.worker_lost(&worker_id).await {
                    error!(worker_id = %worker_id, error = %e, "Failed to requeue tasks of lost worker");
                }

                spawn(
                    &mut workers,
                    &mut slots,
                    Slot {
                        generation: slot.generation + 1,
                        deaths,
                        ..slot
                    },
                    delay,
                );
            }
            _ = reaper.tick() => {
                match broker.reap_stale_workers().await {
                    Ok(stale) if !stale.is_empty() => warn!(?stale, "Reaped stale workers"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Failed to reap stale workers"),
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Worker pool shutdown requested");
                }
            }
        }

        if *shutdown_rx.borrow() && workers.is_empty() {
            break;
        }
    }

    info!("Worker pool stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Metrics;
    use crate::queue::{Broker, FjallQueue, TaskMessage};
    use crate::tasks::{HandlerError, TaskContext, TaskHandler};
    use crate::worker::PoolSpec;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::RwLock;

    /// Panics on its first call, succeeds afterwards
    struct PanicsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for PanicsOnce {
        async fn handle(&self, _ctx: &TaskContext) -> Result<(), HandlerError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("worker process died");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_is_replaced_and_task_redelivered() {
        let temp_dir = TempDir::new().unwrap();
        let queue = Arc::new(RwLock::new(FjallQueue::open(temp_dir.path()).unwrap()));
        let metrics = Arc::new(Metrics::new());
        let broker = Arc::new(TaskBroker::new(
            queue,
            1,
            Duration::from_secs(30),
            metrics.clone(),
        ));

        let handler = Arc::new(PanicsOnce {
            calls: AtomicU32::new(0),
        });
        let mut registry = HandlerRegistry::new();
        registry.register("downloads.generate_thumbnail", handler.clone());

        let config = WorkerConfig {
            pools: vec![PoolSpec {
                queue: "media".into(),
                concurrency: 1,
            }],
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::start(broker.clone(), Arc::new(registry), config);

        broker
            .submit("media", TaskMessage::new("downloads.generate_thumbnail", json!({})))
            .await
            .unwrap();

        for _ in 0..300 {
            if metrics.snapshot().tasks_acked == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_acked, 1);
        assert_eq!(snapshot.workers_lost, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        let workers = broker.active_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].id, "media-0-g1");

        tokio::time::timeout(Duration::from_secs(2), pool.stop())
            .await
            .unwrap();
        assert!(broker.active_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistently_failing_slot_backs_off() {
        let temp_dir = TempDir::new().unwrap();
        let queue = Arc::new(RwLock::new(FjallQueue::open(temp_dir.path()).unwrap()));
        let metrics = Arc::new(Metrics::new());
        let broker = Arc::new(TaskBroker::new(
            queue,
            1,
            Duration::from_secs(30),
            metrics.clone(),
        ));

        // Registration rejects the queue name, so every worker dies at once.
        let config = WorkerConfig {
            pools: vec![PoolSpec {
                queue: "bad:queue".into(),
                concurrency: 1,
            }],
            poll_interval: Duration::from_millis(10),
            restart_backoff: Duration::from_millis(20),
            max_restart_backoff: Duration::from_millis(80),
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::start(broker.clone(), Arc::new(HandlerRegistry::new()), config);

        tokio::time::sleep(Duration::from_millis(400)).await;

        let lost = metrics.snapshot().workers_lost;
        assert!(lost >= 3, "slot was not refilled: {lost}");
        assert!(lost <= 15, "slot refilled without backoff: {lost}");

        tokio::time::timeout(Duration::from_secs(2), pool.stop())
            .await
            .unwrap();
    }
}
