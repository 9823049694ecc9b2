//! Request and response bodies of the HTTP API
//!
//! Health and status responses reuse [`OverallHealth`](crate::health::OverallHealth)
//! and [`StatusSnapshot`](crate::stats::StatusSnapshot) directly; the types
//! here cover the settings, dispatch and diagnostics endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::observability::MetricsSnapshot;
use crate::queue::WorkerInfo;
use crate::scheduler::JobSnapshot;

/// Body of `PUT /settings/{key}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettingUpdate {
    pub value: String,
    /// Omitted or empty keeps the stored description
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of `POST /tasks`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchRequest {
    pub task_id: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchResponse {
    pub task_id: String,
    pub queue: String,
    pub seq: u64,
}

/// Scheduler, worker and queue state returned by `GET /scheduler`
#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub jobs: Vec<JobSnapshot>,
    pub workers: Vec<WorkerInfo>,
    pub queue_depths: Vec<QueueDepth>,
    /// Routed task ids without a registered handler
    pub unhandled_tasks: Vec<String>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct QueueDepth {
    pub queue: String,
    pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
