use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{info, warn};

use super::traits::{HandlerError, TaskContext, TaskHandler};
use crate::cache::MemoryCache;
use crate::store::StatusLog;

/// Drops StatusLog history older than the retention window
///
/// The latest record of every component survives. A payload of
/// `{"older_than_days": N}` overrides the window for one run.
pub struct CleanupHandler {
    status_log: StatusLog,
    retention: Duration,
}

impl CleanupHandler {
    pub fn new(status_log: StatusLog, retention: Duration) -> Self {
        Self {
            status_log,
            retention,
        }
    }

    fn window(&self, ctx: &TaskContext) -> Result<chrono::Duration, HandlerError> {
        match ctx.task.payload.get("older_than_days") {
            None => chrono::Duration::from_std(self.retention)
                .map_err(|e| HandlerError::Fatal(format!("retention out of range: {e}"))),
            Some(days) => days
                .as_u64()
                .filter(|days| *days > 0)
                .and_then(|days| i64::try_from(days).ok())
                .and_then(chrono::Duration::try_days)
                .ok_or_else(|| {
                    HandlerError::InvalidPayload(format!("older_than_days must be a positive integer, got {days}"))
                }),
        }
    }
}

#[async_trait]
impl TaskHandler for CleanupHandler {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError> {
        let cutoff = Utc::now()
            .checked_sub_signed(self.window(ctx)?)
            .ok_or_else(|| HandlerError::InvalidPayload("retention window out of range".into()))?;
        let status_log = self.status_log.clone();

        let pruned = tokio::task::spawn_blocking(move || status_log.prune_before(cutoff))
            .await
            .map_err(|e| HandlerError::Retryable(e.to_string()))?
            .map_err(|e| HandlerError::Retryable(e.to_string()))?;

        info!(seq = ctx.seq, pruned, %cutoff, "Old status records pruned");
        Ok(())
    }
}

/// Reclaims expired cache entries
pub struct CacheSweepHandler {
    cache: MemoryCache,
}

impl CacheSweepHandler {
    pub fn new(cache: MemoryCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl TaskHandler for CacheSweepHandler {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError> {
        let purged = self.cache.purge_expired();
        info!(seq = ctx.seq, purged, remaining = self.cache.len(), "Cache swept");
        Ok(())
    }
}

/// Runs the configured dependency-update command, if any
pub struct DependencyUpdateHandler {
    command: Vec<String>,
}

impl DependencyUpdateHandler {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl TaskHandler for DependencyUpdateHandler {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError> {
        let Some((program, args)) = self.command.split_first() else {
            info!(seq = ctx.seq, "No dependency update command configured, skipping");
            return Ok(());
        };

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| HandlerError::Retryable(format!("failed to spawn {program}: {e}")))?;

        if output.status.success() {
            info!(seq = ctx.seq, program = %program, "Dependency update finished");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(seq = ctx.seq, program = %program, status = %output.status, "Dependency update failed");
            Err(HandlerError::Retryable(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBackend;
    use crate::queue::TaskMessage;
    use crate::store::{ComponentStatus, Details, FjallStore};
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn ctx(payload: Value) -> TaskContext {
        TaskContext {
            seq: 7,
            queue: "cleanup".into(),
            worker_id: "cleanup-0".into(),
            task: TaskMessage::new("downloads.cleanup_old_files", payload),
        }
    }

    #[tokio::test]
    async fn test_cleanup_keeps_latest_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path()).unwrap();
        let log = store.status_log();
        log.record("cache", ComponentStatus::Error, "Cache connection failed", Details::new())
            .unwrap();
        log.record("cache", ComponentStatus::Healthy, "Cache OK", Details::new())
            .unwrap();

        let handler = CleanupHandler::new(log.clone(), Duration::from_secs(30 * 86400));
        handler.handle(&ctx(Value::Null)).await.unwrap();
        assert_eq!(log.latest("cache").unwrap().unwrap().message, "Cache OK");

        tokio::time::sleep(Duration::from_millis(5)).await;
        let zero_window = CleanupHandler::new(log.clone(), Duration::from_millis(1));
        zero_window.handle(&ctx(Value::Null)).await.unwrap();
        assert_eq!(log.latest("cache").unwrap().unwrap().message, "Cache OK");
    }

    #[tokio::test]
    async fn test_cleanup_rejects_bad_payload() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path()).unwrap();
        let handler = CleanupHandler::new(store.status_log(), Duration::from_secs(86400));

        let result = handler.handle(&ctx(json!({"older_than_days": "soon"}))).await;
        assert!(matches!(result, Err(HandlerError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_cache_sweep_purges_expired() {
        let cache = MemoryCache::new();
        cache.set("stale", "v", Duration::from_millis(1)).await.unwrap();
        cache.set("fresh", "v", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        CacheSweepHandler::new(cache.clone())
            .handle(&ctx(Value::Null))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_update_without_command_is_noop() {
        let handler = DependencyUpdateHandler::new(Vec::new());
        handler.handle(&ctx(Value::Null)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dependency_update_missing_binary_is_retryable() {
        let handler = DependencyUpdateHandler::new(vec!["/nonexistent/mediaops-updater".into()]);
        let error = handler.handle(&ctx(Value::Null)).await.unwrap_err();
        assert!(error.is_retryable());
    }
}
