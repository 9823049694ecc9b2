use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{Result, SchedulerError};
use super::periodic::{DueSlot, JobSchedule, JobSnapshot, PeriodicJob, ensure_unique_names};
use super::routes::TaskRouter;
use crate::observability::Metrics;
use crate::queue::{Broker, TaskMessage};
use crate::store::{ComponentStatus, Details, StatusLog};

/// StatusLog component the scheduler reports enqueue alarms under
pub const SCHEDULER_COMPONENT: &str = "scheduler";

/// Exponential backoff for enqueue attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Where a submitted task landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatched {
    pub queue: String,
    pub seq: u64,
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: Vec<String>,
    pub failed: Vec<String>,
    pub skipped_slots: u64,
}

/// Periodic job table plus task routing in front of a [`Broker`]
pub struct Scheduler {
    broker: Arc<dyn Broker>,
    router: TaskRouter,
    jobs: Mutex<Vec<JobSchedule>>,
    retry: RetryPolicy,
    status_log: Option<StatusLog>,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    /// Jobs become due one interval after `start`
    pub fn new(
        broker: Arc<dyn Broker>,
        router: TaskRouter,
        jobs: Vec<PeriodicJob>,
        start: DateTime<Utc>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        ensure_unique_names(&jobs)?;

        info!(
            jobs = jobs.len(),
            routes = router.routes().len(),
            default_queue = router.default_queue(),
            "Creating scheduler"
        );

        Ok(Self {
            broker,
            router,
            jobs: Mutex::new(
                jobs.into_iter()
                    .map(|job| JobSchedule::new(job, start))
                    .collect(),
            ),
            retry: RetryPolicy::default(),
            status_log: None,
            metrics,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Write an alarm record when a periodic job cannot be enqueued
    pub fn with_status_log(mut self, status_log: StatusLog) -> Self {
        self.status_log = Some(status_log);
        self
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    /// Submit an on-demand task through the routing table
    pub async fn dispatch(&self, task_id: &str, payload: Value) -> Result<Dispatched> {
        self.submit(TaskMessage::new(task_id, payload)).await
    }

    /// Enqueue every periodic job with an elapsed slot
    ///
    /// Jobs are dispatched concurrently; one job's failure leaves the
    /// others untouched.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut jobs = self.jobs.lock().await;
        let mut report = TickReport::default();

        let due: Vec<(usize, DueSlot)> = jobs
            .iter_mut()
            .enumerate()
            .filter_map(|(index, schedule)| schedule.poll(now).map(|slot| (index, slot)))
            .collect();

        for (index, slot) in &due {
            if slot.skipped > 0 {
                warn!(
                    job = %jobs[*index].job().name,
                    skipped = slot.skipped,
                    "Periodic job missed slots"
                );
                self.metrics.slots_missed(slot.skipped);
                report.skipped_slots += slot.skipped;
            }
        }

        let outcomes = join_all(due.iter().map(|(index, slot)| {
            let job = jobs[*index].job().clone();
            let nominal = slot.nominal;
            async move {
                let task = TaskMessage::scheduled(job.task_id.clone(), nominal);
                (self.submit_to(&job.queue, task).await, job)
            }
        }))
        .await;

        for ((index, slot), (outcome, job)) in due.iter().zip(outcomes) {
            match outcome {
                Ok(dispatched) => {
                    if jobs[*index].mark_dispatched(slot.nominal) {
                        info!(job = %job.name, "Periodic job enqueued again");
                        self.clear_alarm(&job);
                    }
                    debug!(job = %job.name, queue = %dispatched.queue, seq = dispatched.seq, "Periodic job dispatched");
                    report.dispatched.push(job.name);
                }
                Err(e) => {
                    if jobs[*index].mark_failed() {
                        error!(job = %job.name, error = %e, "Periodic job stays due");
                        self.raise_alarm(&job, &e);
                    } else {
                        debug!(job = %job.name, error = %e, "Periodic job still failing");
                    }
                    report.failed.push(job.name);
                }
            }
        }

        report
    }

    pub async fn job_snapshots(&self) -> Vec<JobSnapshot> {
        self.jobs.lock().await.iter().map(JobSnapshot::from).collect()
    }

    /// Run `tick` every `period` until the returned handle is stopped
    pub fn spawn(self: Arc<Self>, period: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.tick(Utc::now()).await;
                        if !report.dispatched.is_empty() || !report.failed.is_empty() {
                            info!(
                                dispatched = report.dispatched.len(),
                                failed = report.failed.len(),
                                "Scheduler tick"
                            );
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Scheduler shutdown requested");
                        break;
                    }
                }
            }

            info!("Scheduler stopped");
        });

        SchedulerHandle {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn submit(&self, task: TaskMessage) -> Result<Dispatched> {
        let queue = self.router.queue_for(&task.task_id).to_string();
        self.submit_to(&queue, task).await
    }

    async fn submit_to(&self, queue: &str, task: TaskMessage) -> Result<Dispatched> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.broker.submit(queue, task.clone()).await {
                Ok(seq) => {
                    if attempts > 1 {
                        debug!(queue, attempts, "Enqueue succeeded after retry");
                    }
                    self.metrics.task_dispatched();
                    return Ok(Dispatched {
                        queue: queue.to_string(),
                        seq,
                    });
                }
                Err(e) => {
                    if attempts >= self.retry.attempts {
                        warn!(queue, attempts, error = %e, "Enqueue failed after retries");
                        self.metrics.dispatch_failed();
                        return Err(SchedulerError::Dispatch {
                            queue: queue.to_string(),
                            attempts,
                            source: e,
                        });
                    }

                    warn!(queue, attempts, error = %e, "Enqueue failed, retrying");
                    self.metrics.dispatch_retried();
                    tokio::time::sleep(self.retry.backoff(attempts)).await;
                }
            }
        }
    }

    /// Record that `job` started failing; repeats are not recorded
    fn raise_alarm(&self, job: &PeriodicJob, error: &SchedulerError) {
        let message = format!("Periodic job {} could not be enqueued: {}", job.name, error);
        self.record_job_status(job, ComponentStatus::Error, &message);
    }

    fn clear_alarm(&self, job: &PeriodicJob) {
        let message = format!("Periodic job {} enqueued again", job.name);
        self.record_job_status(job, ComponentStatus::Healthy, &message);
    }

    fn record_job_status(&self, job: &PeriodicJob, status: ComponentStatus, message: &str) {
        let Some(status_log) = &self.status_log else {
            return;
        };

        let mut details = Details::new();
        details.insert("job".into(), json!(job.name));
        details.insert("task_id".into(), json!(job.task_id));
        details.insert("queue".into(), json!(job.queue));

        if let Err(e) = status_log.record(SCHEDULER_COMPONENT, status, message, details) {
            warn!(error = %e, "Failed to record scheduler status");
        }
    }
}

/// Stops a spawned scheduler loop
pub struct SchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub async fn stop(mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for scheduler to stop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QueueError, WorkerInfo};
    use crate::scheduler::routes::{CLEANUP_OLD_FILES, CLEAR_EXPIRED_CACHE, PROCESS_DOWNLOAD};
    use crate::store::FjallStore;
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// Records submissions; fails every submit to a queue in `broken`
    #[derive(Default)]
    struct RecordingBroker {
        submitted: StdMutex<Vec<(String, TaskMessage)>>,
        broken: StdMutex<Vec<String>>,
    }

    impl RecordingBroker {
        fn failing(queue: &str) -> Self {
            Self {
                broken: StdMutex::new(vec![queue.to_string()]),
                ..Self::default()
            }
        }

        fn heal(&self) {
            self.broken.lock().unwrap().clear();
        }

        fn submitted(&self) -> Vec<(String, TaskMessage)> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn submit(&self, queue: &str, task: TaskMessage) -> std::result::Result<u64, QueueError> {
            if self.broken.lock().unwrap().iter().any(|broken| broken == queue) {
                return Err(QueueError::Unavailable("connection reset".into()));
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push((queue.to_string(), task));
            Ok(submitted.len() as u64 - 1)
        }

        async fn active_workers(&self) -> std::result::Result<Vec<WorkerInfo>, QueueError> {
            Ok(Vec::new())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    fn scheduler(broker: Arc<RecordingBroker>, jobs: Vec<PeriodicJob>) -> Scheduler {
        Scheduler::new(
            broker,
            TaskRouter::with_defaults(),
            jobs,
            start(),
            Arc::new(Metrics::new()),
        )
        .unwrap()
        .with_retry(fast_retry())
    }

    fn job(name: &str, task_id: &str, secs: u64, queue: &str) -> PeriodicJob {
        PeriodicJob::new(name, task_id, Duration::from_secs(secs), queue).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_uses_route() {
        let broker = Arc::new(RecordingBroker::default());
        let scheduler = scheduler(broker.clone(), Vec::new());

        let cleanup = scheduler.dispatch(CLEANUP_OLD_FILES, json!({})).await.unwrap();
        assert_eq!(cleanup.queue, "cleanup");

        let download = scheduler
            .dispatch(PROCESS_DOWNLOAD, json!({"download_id": "d-1"}))
            .await
            .unwrap();
        assert_eq!(download.queue, "downloads");

        let unknown = scheduler.dispatch("reports.weekly", Value::Null).await.unwrap();
        assert_eq!(unknown.queue, "default");

        let submitted = broker.submitted();
        assert_eq!(submitted[1].1.payload["download_id"], "d-1");
    }

    #[tokio::test]
    async fn test_dispatch_failure_after_retries() {
        let broker = Arc::new(RecordingBroker::failing("media"));
        let scheduler = scheduler(broker, Vec::new());

        let result = scheduler
            .dispatch(crate::scheduler::routes::GENERATE_THUMBNAIL, Value::Null)
            .await;
        assert!(matches!(
            result,
            Err(SchedulerError::Dispatch { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_periodic_dispatches_exactly_one_interval_apart() {
        let broker = Arc::new(RecordingBroker::default());
        let scheduler = scheduler(
            broker.clone(),
            vec![job("cache-expiry-sweep", CLEAR_EXPIRED_CACHE, 1800, "default")],
        );

        assert!(scheduler.tick(start() + TimeDelta::seconds(600)).await.dispatched.is_empty());
        scheduler.tick(start() + TimeDelta::seconds(1803)).await;
        scheduler.tick(start() + TimeDelta::seconds(3650)).await;

        let submitted = broker.submitted();
        assert_eq!(submitted.len(), 2);
        let first = submitted[0].1.scheduled_for.unwrap();
        let second = submitted[1].1.scheduled_for.unwrap();
        assert_eq!(first, start() + TimeDelta::seconds(1800));
        assert_eq!(second - first, TimeDelta::seconds(1800));
    }

    #[tokio::test]
    async fn test_failing_job_stays_due_without_affecting_others() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path()).unwrap();
        let broker = Arc::new(RecordingBroker::failing("cleanup"));
        let scheduler = scheduler(
            broker.clone(),
            vec![
                job("cleanup-old-downloads", CLEANUP_OLD_FILES, 60, "cleanup"),
                job("cache-expiry-sweep", CLEAR_EXPIRED_CACHE, 60, "default"),
            ],
        )
        .with_status_log(store.status_log());

        let report = scheduler.tick(start() + TimeDelta::seconds(60)).await;
        assert_eq!(report.dispatched, vec!["cache-expiry-sweep".to_string()]);
        assert_eq!(report.failed, vec!["cleanup-old-downloads".to_string()]);

        let states = scheduler.job_snapshots().await;
        assert_eq!(states[0].state, crate::scheduler::JobState::Due);
        assert_eq!(states[1].state, crate::scheduler::JobState::Dispatched);

        let alarm = store.status_log().latest(SCHEDULER_COMPONENT).unwrap().unwrap();
        assert_eq!(alarm.status, ComponentStatus::Error);
        assert_eq!(alarm.details["job"], "cleanup-old-downloads");

        // Still due on the next tick, same nominal slot.
        let report = scheduler.tick(start() + TimeDelta::seconds(61)).await;
        assert_eq!(report.failed, vec!["cleanup-old-downloads".to_string()]);
        assert!(report.dispatched.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_failures_record_one_alarm() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path()).unwrap();
        let broker = Arc::new(RecordingBroker::failing("cleanup"));
        let scheduler = scheduler(
            broker.clone(),
            vec![job("cleanup-old-downloads", CLEANUP_OLD_FILES, 60, "cleanup")],
        )
        .with_status_log(store.status_log());
        let log = store.status_log();

        scheduler.tick(start() + TimeDelta::seconds(60)).await;
        let alarm = log.latest(SCHEDULER_COMPONENT).unwrap().unwrap();
        assert_eq!(alarm.status, ComponentStatus::Error);

        for second in 61..71 {
            let report = scheduler.tick(start() + TimeDelta::seconds(second)).await;
            assert_eq!(report.failed.len(), 1);
        }
        assert_eq!(log.latest(SCHEDULER_COMPONENT).unwrap().unwrap(), alarm);
        assert!(scheduler.job_snapshots().await[0].failing);

        broker.heal();
        let report = scheduler.tick(start() + TimeDelta::seconds(71)).await;
        assert_eq!(report.dispatched.len(), 1);

        let recovered = log.latest(SCHEDULER_COMPONENT).unwrap().unwrap();
        assert_eq!(recovered.status, ComponentStatus::Healthy);
        assert_eq!(recovered.details["job"], "cleanup-old-downloads");
        assert!(recovered.seq > alarm.seq);
        assert!(!scheduler.job_snapshots().await[0].failing);
    }

    #[tokio::test]
    async fn test_duplicate_job_names_rejected() {
        let result = Scheduler::new(
            Arc::new(RecordingBroker::default()),
            TaskRouter::with_defaults(),
            vec![
                job("same", CLEANUP_OLD_FILES, 60, "cleanup"),
                job("same", CLEAR_EXPIRED_CACHE, 60, "default"),
            ],
            start(),
            Arc::new(Metrics::new()),
        );
        assert!(matches!(result, Err(SchedulerError::DuplicateJob(_))));
    }

    #[tokio::test]
    async fn test_spawned_loop_stops() {
        let scheduler = Arc::new(scheduler(Arc::new(RecordingBroker::default()), Vec::new()));
        let handle = scheduler.spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();
    }
}
