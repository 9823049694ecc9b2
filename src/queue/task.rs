use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unit of work travelling through a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    /// Handler identifier, also the routing key
    pub task_id: String,
    #[serde(default)]
    pub payload: Value,
    /// Delivery attempt, starting at 1
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Nominal fire time for periodic jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl TaskMessage {
    pub fn new(task_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_id: task_id.into(),
            payload,
            attempt: 1,
            enqueued_at: Utc::now(),
            scheduled_for: None,
        }
    }

    pub fn scheduled(task_id: impl Into<String>, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            scheduled_for: Some(scheduled_for),
            ..Self::new(task_id, Value::Null)
        }
    }
}

/// A leased task handed to one worker
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub seq: u64,
    pub queue: String,
    pub task: TaskMessage,
}

/// Who holds an in-flight task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub queue: String,
    pub worker_id: String,
    pub leased_at: DateTime<Utc>,
}

/// Task that exhausted its retries or could not be handled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterTask {
    pub task: TaskMessage,
    pub queue: String,
    pub failure_code: String,
    pub failure_message: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}
