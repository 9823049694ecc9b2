use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::{
    services::{
        component_status, dispatch_task, get_setting, health, list_settings, put_setting,
        scheduler_status, status,
    },
    state::AppState,
};
use crate::config::Config;
use crate::worker::WorkerPool;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// HTTP routes over a prepared [`AppState`]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/api/core/status", get(status))
        .route("/status/components/{component}", get(component_status))
        .route("/settings", get(list_settings))
        .route("/settings/{key}", get(get_setting).put(put_setting))
        .route("/tasks", post(dispatch_task))
        .route("/scheduler", get(scheduler_status))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serve the API with the scheduler and worker pool running beside it
///
/// On shutdown the scheduler stops first so no new periodic task is
/// queued, then workers finish their current task, then both keyspaces
/// are flushed.
pub async fn run(config: Config) -> Result<(), AnyError> {
    let address = config.server.bind_addr;
    let state = AppState::open(config).await?;
    for task_id in state.unhandled_tasks() {
        warn!(task_id = %task_id, "Routed task has no handler; deliveries will be dead-lettered");
    }

    let pool = WorkerPool::start(
        state.broker.clone(),
        state.registry.clone(),
        state.config.workers.to_worker_config(),
    );
    let scheduler = state.scheduler.clone().spawn(state.scheduler_tick());

    let app = router(state.clone());

    let listener = TcpListener::bind(address).await?;
    info!(%address, "mediaops API listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop().await;
    pool.stop().await;

    if let Err(e) = state.broker.flush().await {
        error!(error = %e, "Failed to flush queue");
    }
    if let Err(e) = state.store.persist() {
        error!(error = %e, "Failed to persist store");
    }

    served?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
