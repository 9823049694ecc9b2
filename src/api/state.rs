use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::cache::MemoryCache;
use crate::config::{Config, ConfigError};
use crate::health::{CacheProbe, FreeSpaceProbe, Probe, ProbeRunner, StorageProbe, WorkerPoolProbe};
use crate::observability::Metrics;
use crate::queue::{Broker, FjallQueue, QueueError, TaskBroker};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::stats::{ResourceSampler, StatsAggregator, SysinfoSampler};
use crate::store::{FjallStore, SettingsStore, StatusLog, StoreError};
use crate::tasks::{HandlerRegistry, TaskHandler, builtin_registry};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Everything the handlers and background services share
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: FjallStore,
    pub settings: SettingsStore,
    pub status_log: StatusLog,
    pub cache: MemoryCache,
    pub broker: Arc<TaskBroker>,
    pub registry: Arc<HandlerRegistry>,
    pub health: Arc<ProbeRunner>,
    pub stats: Arc<StatsAggregator>,
    pub scheduler: Arc<Scheduler>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Open the keyspaces under `server.data_dir` and wire every component
    ///
    /// Leases left by a previous process are returned to their queues here.
    pub async fn open(config: Config) -> Result<Self, StartupError> {
        let metrics = Arc::new(Metrics::new());

        info!(path = %config.server.store_path().display(), "Opening store");
        let store = FjallStore::open(config.server.store_path())?;
        let settings = store.settings();
        let status_log = store.status_log();

        info!(path = %config.server.queue_path().display(), "Opening queue");
        let queue = Arc::new(RwLock::new(FjallQueue::open(config.server.queue_path())?));
        let broker = Arc::new(TaskBroker::new(
            queue,
            config.workers.prefetch,
            config.workers.heartbeat_ttl(),
            metrics.clone(),
        ));
        let recovered = broker.recover().await?;
        if recovered > 0 {
            info!(recovered, "Requeued tasks leased by a previous process");
        }

        let cache = MemoryCache::new();
        let registry = builtin_registry(
            status_log.clone(),
            cache.clone(),
            config.retention.status_ttl(),
            config.maintenance.dependency_update_command.clone(),
        );

        let sampler: Arc<dyn ResourceSampler> = Arc::new(SysinfoSampler::new());
        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(StorageProbe::new(Arc::new(store.clone()))),
            Arc::new(CacheProbe::new(
                Arc::new(cache.clone()),
                config.health.cache_ttl(),
            )),
            Arc::new(WorkerPoolProbe::new(broker.clone())),
            Arc::new(FreeSpaceProbe::new(
                sampler.clone(),
                config.disk_path(),
                config.health.min_free_percent,
            )),
        ];
        let mut health = ProbeRunner::new(probes, config.health.probe_timeout(), metrics.clone());
        if config.health.record_status {
            health = health.with_status_log(status_log.clone());
        }

        let stats = StatsAggregator::new(
            sampler,
            Arc::new(store.downloads()),
            status_log.clone(),
            config.disk_path(),
            config.health.probe_timeout(),
        );

        let router = config.router();
        let jobs = config.periodic_jobs(&router)?;
        let submitter: Arc<dyn Broker> = broker.clone();
        let scheduler = Scheduler::new(submitter, router, jobs, Utc::now(), metrics.clone())?
            .with_retry(config.retry_policy())
            .with_status_log(status_log.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            settings,
            status_log,
            cache,
            broker,
            registry: Arc::new(registry),
            health: Arc::new(health),
            stats: Arc::new(stats),
            scheduler: Arc::new(scheduler),
            metrics,
        })
    }

    /// Add or replace the handler for `task_id` before the workers start
    pub fn register_handler(&mut self, task_id: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        Arc::make_mut(&mut self.registry).register(task_id, handler);
    }

    /// Routed task ids that would be dead-lettered for lack of a handler
    pub fn unhandled_tasks(&self) -> Vec<String> {
        self.registry
            .unhandled(self.scheduler.router().routes().keys().map(String::as_str))
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.config.scheduler.tick_ms)
    }
}
