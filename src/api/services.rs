use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use super::{
    error::ApiError,
    models::{DispatchRequest, DispatchResponse, QueueDepth, SchedulerStatus, SettingUpdate},
    state::AppState,
    validation::{validate_dispatch, validate_setting},
};
use crate::queue::Broker;
use crate::store::StoreError;

/// Liveness endpoint (GET /health)
///
/// Runs every probe concurrently, each under its own timeout. Returns
/// 200 when all of them pass and 503 otherwise; the body lists every
/// probe's verdict either way.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.run().await;

    let status_code = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(report))
}

/// Diagnostics endpoint (GET /status, GET /api/core/status)
///
/// Always 200: a block that cannot be computed carries an `error` field
/// instead of its numbers.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.snapshot().await)
}

/// Latest status record of one component (GET /status/components/{component})
pub async fn component_status(
    State(state): State<AppState>,
    Path(component): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status_log = state.status_log.clone();
    let lookup = component.clone();
    let record = blocking(move || status_log.latest(&lookup))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("component {component}")))?;

    Ok(Json(record))
}

/// All settings ordered by key (GET /settings)
pub async fn list_settings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let settings = state.settings.clone();
    Ok(Json(blocking(move || settings.list()).await?))
}

/// One setting (GET /settings/{key})
pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.settings.clone();
    let lookup = key.clone();
    let setting = blocking(move || settings.try_get(&lookup))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("setting {key}")))?;

    Ok(Json(setting))
}

/// Create or update a setting (PUT /settings/{key})
pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(update): Json<SettingUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    validate_setting(&key, &update)?;

    let settings = state.settings.clone();
    let setting = blocking(move || {
        let description = update.description.as_deref().unwrap_or_default();
        settings.set(&key, &update.value, description)
    })
    .await?;
    info!(key = %setting.key, "Setting updated");

    Ok(Json(setting))
}

/// Run a synchronous store call on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

/// Submit a task through the routing table (POST /tasks)
///
/// Returns 202 once the task is durably queued; execution happens on
/// whichever worker pool consumes the routed queue.
pub async fn dispatch_task(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_dispatch(&request)?;

    let dispatched = state
        .scheduler
        .dispatch(&request.task_id, request.payload)
        .await?;

    let response = DispatchResponse {
        task_id: request.task_id,
        queue: dispatched.queue,
        seq: dispatched.seq,
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Periodic jobs, live workers, queue depths and counters (GET /scheduler)
pub async fn scheduler_status(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.scheduler.job_snapshots().await;
    let workers = state
        .broker
        .active_workers()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut queue_depths = Vec::new();
    for pool in &state.config.workers.pools {
        let pending = state
            .broker
            .depth(&pool.queue)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        queue_depths.push(QueueDepth {
            queue: pool.queue.clone(),
            pending,
        });
    }

    Ok(Json(SchedulerStatus {
        jobs,
        workers,
        queue_depths,
        unhandled_tasks: state.unhandled_tasks(),
        metrics: state.metrics.snapshot(),
    }))
}
