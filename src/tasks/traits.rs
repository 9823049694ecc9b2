use async_trait::async_trait;
use thiserror::Error;

use crate::queue::TaskMessage;

/// Handler errors
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("task failed: {0}")]
    Retryable(String),
    #[error("fatal handler error: {0}")]
    Fatal(String),
}

impl HandlerError {
    /// Whether another delivery could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            HandlerError::InvalidPayload(_) => "INVALID_PAYLOAD",
            HandlerError::Retryable(_) => "HANDLER_ERROR",
            HandlerError::Fatal(_) => "FATAL",
        }
    }
}

/// What a handler gets for one delivery
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub seq: u64,
    pub queue: String,
    pub worker_id: String,
    pub task: TaskMessage,
}

/// Executes one kind of task
///
/// Delivery is at-least-once, so handlers must tolerate running the same
/// task twice.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError>;
}
