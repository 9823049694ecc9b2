use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::error::{Result, SchedulerError};
use super::routes::{CLEANUP_OLD_FILES, CLEAR_EXPIRED_CACHE, TaskRouter, UPDATE_DEPENDENCIES};

/// A recurring job, fixed for the lifetime of the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicJob {
    pub name: String,
    pub task_id: String,
    pub interval: Duration,
    pub queue: String,
}

impl PeriodicJob {
    pub fn new(
        name: impl Into<String>,
        task_id: impl Into<String>,
        interval: Duration,
        queue: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(name));
        }
        Ok(Self {
            name,
            task_id: task_id.into(),
            interval,
            queue: queue.into(),
        })
    }

    /// Job whose queue comes from the router
    pub fn routed(
        name: impl Into<String>,
        task_id: impl Into<String>,
        interval: Duration,
        router: &TaskRouter,
    ) -> Result<Self> {
        let task_id = task_id.into();
        let queue = router.queue_for(&task_id).to_string();
        Self::new(name, task_id, interval, queue)
    }
}

/// Hourly cleanup, daily dependency update and half-hourly cache sweep
pub fn default_jobs(router: &TaskRouter) -> Result<Vec<PeriodicJob>> {
    Ok(vec![
        PeriodicJob::routed(
            "cleanup-old-downloads",
            CLEANUP_OLD_FILES,
            Duration::from_secs(3600),
            router,
        )?,
        PeriodicJob::routed(
            "update-dependencies",
            UPDATE_DEPENDENCIES,
            Duration::from_secs(86400),
            router,
        )?,
        PeriodicJob::routed(
            "cache-expiry-sweep",
            CLEAR_EXPIRED_CACHE,
            Duration::from_secs(1800),
            router,
        )?,
    ])
}

pub fn ensure_unique_names(jobs: &[PeriodicJob]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for job in jobs {
        if !seen.insert(job.name.as_str()) {
            return Err(SchedulerError::DuplicateJob(job.name.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Due,
    Dispatched,
}

/// A slot the scheduler should enqueue now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueSlot {
    /// Nominal fire time of the slot being dispatched
    pub nominal: DateTime<Utc>,
    /// Earlier slots dropped to catch up
    pub skipped: u64,
}

/// Fixed-rate timetable of one job
///
/// Slots sit at `start + k * interval`. A slot is dispatched at most once;
/// when several have elapsed only the most recent is dispatched and the
/// rest are counted as skipped.
#[derive(Debug, Clone)]
pub struct JobSchedule {
    job: PeriodicJob,
    interval: TimeDelta,
    state: JobState,
    next_due: DateTime<Utc>,
    last_dispatched: Option<DateTime<Utc>>,
    skipped_total: u64,
    failing: bool,
}

impl JobSchedule {
    pub fn new(job: PeriodicJob, start: DateTime<Utc>) -> Self {
        let interval = TimeDelta::from_std(job.interval).unwrap_or(TimeDelta::MAX);
        Self {
            next_due: start.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC),
            job,
            interval,
            state: JobState::Idle,
            last_dispatched: None,
            skipped_total: 0,
            failing: false,
        }
    }

    pub fn job(&self) -> &PeriodicJob {
        &self.job
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn next_due(&self) -> DateTime<Utc> {
        self.next_due
    }

    pub fn last_dispatched(&self) -> Option<DateTime<Utc>> {
        self.last_dispatched
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    /// Whether the last enqueue attempt failed
    pub fn is_failing(&self) -> bool {
        self.failing
    }

    /// Move to `Due` if a slot has elapsed at `now`
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<DueSlot> {
        if now < self.next_due {
            if self.state == JobState::Dispatched {
                self.state = JobState::Idle;
            }
            return None;
        }

        let behind = slots_between(self.next_due, now, self.interval);
        let nominal = self.next_due + self.interval * behind as i32;
        self.next_due = nominal;
        self.skipped_total += behind;
        self.state = JobState::Due;

        Some(DueSlot {
            nominal,
            skipped: behind,
        })
    }

    /// The due slot was enqueued; advance to the following slot
    ///
    /// Returns `true` when this ends a run of failures.
    pub fn mark_dispatched(&mut self, nominal: DateTime<Utc>) -> bool {
        self.state = JobState::Dispatched;
        self.last_dispatched = Some(nominal);
        self.next_due = nominal + self.interval;
        std::mem::replace(&mut self.failing, false)
    }

    /// Enqueue failed; the slot stays due for the next tick
    ///
    /// Returns `true` on the first failure after a success.
    pub fn mark_failed(&mut self) -> bool {
        self.state = JobState::Due;
        !std::mem::replace(&mut self.failing, true)
    }
}

/// Whole intervals from `from` to `to`
fn slots_between(from: DateTime<Utc>, to: DateTime<Utc>, interval: TimeDelta) -> u64 {
    let elapsed = (to - from).num_milliseconds();
    let step = interval.num_milliseconds().max(1);
    (elapsed / step).clamp(0, i32::MAX as i64) as u64
}

/// Serializable view of a job for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub name: String,
    pub task_id: String,
    pub queue: String,
    pub interval_secs: f64,
    pub state: JobState,
    pub next_due: DateTime<Utc>,
    pub last_dispatched: Option<DateTime<Utc>>,
    pub skipped_slots: u64,
    pub failing: bool,
}

impl From<&JobSchedule> for JobSnapshot {
    fn from(schedule: &JobSchedule) -> Self {
        Self {
            name: schedule.job.name.clone(),
            task_id: schedule.job.task_id.clone(),
            queue: schedule.job.queue.clone(),
            interval_secs: schedule.job.interval.as_secs_f64(),
            state: schedule.state,
            next_due: schedule.next_due,
            last_dispatched: schedule.last_dispatched,
            skipped_slots: schedule.skipped_total,
            failing: schedule.failing,
        }
    }
}
