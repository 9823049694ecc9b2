//! Periodic job table, task routing and the dispatch loop
//!
//! # Example
//!
//! ```rust,ignore
//! let router = TaskRouter::with_defaults();
//! let jobs = default_jobs(&router)?;
//! let scheduler = Arc::new(Scheduler::new(broker, router, jobs, Utc::now(), metrics)?);
//!
//! scheduler.dispatch(PROCESS_DOWNLOAD, json!({"download_id": id})).await?;
//! let handle = scheduler.clone().spawn(Duration::from_secs(1));
//! ```

mod dispatcher;
mod error;
mod periodic;
pub mod routes;

pub use dispatcher::{Dispatched, RetryPolicy, SCHEDULER_COMPONENT, Scheduler, SchedulerHandle, TickReport};
pub use error::{Result, SchedulerError};
pub use periodic::{DueSlot, JobSchedule, JobSnapshot, JobState, PeriodicJob, default_jobs, ensure_unique_names};
pub use routes::{DEFAULT_QUEUE, TaskRouter};
