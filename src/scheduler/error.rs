use thiserror::Error;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Periodic job {0:?} must have a positive interval")]
    InvalidInterval(String),

    #[error("Duplicate periodic job name: {0}")]
    DuplicateJob(String),

    #[error("Enqueue to {queue} failed after {attempts} attempt(s): {source}")]
    Dispatch {
        queue: String,
        attempts: u32,
        #[source]
        source: QueueError,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
