use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::probe::{Probe, ProbeError, ProbeResult, StorageBackend};
use crate::cache::CacheBackend;
use crate::queue::Broker;
use crate::stats::ResourceSampler;

const CACHE_SENTINEL_KEY: &str = "health_check";
const CACHE_SENTINEL_VALUE: &str = "ok";

/// Default minimum free share of the data volume
pub const DEFAULT_MIN_FREE_PERCENT: f64 = 10.0;

/// Round trip against the persistence layer
pub struct StorageProbe {
    backend: Arc<dyn StorageBackend>,
}

impl StorageProbe {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Probe for StorageProbe {
    fn name(&self) -> &'static str {
        "database"
    }

    fn label(&self) -> &'static str {
        "Database"
    }

    async fn check(&self) -> Result<ProbeResult, ProbeError> {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.ping())
            .await
            .map_err(|e| ProbeError::Backend(e.to_string()))??;
        Ok(ProbeResult::healthy("Database OK"))
    }
}

/// Writes a short-lived sentinel and reads it back
pub struct CacheProbe {
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl CacheProbe {
    pub fn new(cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl Probe for CacheProbe {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn label(&self) -> &'static str {
        "Cache"
    }

    async fn check(&self) -> Result<ProbeResult, ProbeError> {
        self.cache
            .set(CACHE_SENTINEL_KEY, CACHE_SENTINEL_VALUE, self.ttl)
            .await?;
        let value = self.cache.get(CACHE_SENTINEL_KEY).await?;

        if value.as_deref() == Some(CACHE_SENTINEL_VALUE) {
            Ok(ProbeResult::healthy("Cache OK"))
        } else {
            Ok(ProbeResult::unhealthy("Cache connection failed"))
        }
    }
}

/// At least one worker must be consuming
pub struct WorkerPoolProbe {
    broker: Arc<dyn Broker>,
}

impl WorkerPoolProbe {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Probe for WorkerPoolProbe {
    fn name(&self) -> &'static str {
        "workers"
    }

    fn label(&self) -> &'static str {
        "Workers"
    }

    async fn check(&self) -> Result<ProbeResult, ProbeError> {
        let workers = self.broker.active_workers().await?;
        if workers.is_empty() {
            Ok(ProbeResult::unhealthy("No workers active"))
        } else {
            Ok(ProbeResult::healthy(format!(
                "Workers OK - {} workers",
                workers.len()
            )))
        }
    }
}

/// Free share of the data volume must stay above a threshold
pub struct FreeSpaceProbe {
    sampler: Arc<dyn ResourceSampler>,
    path: PathBuf,
    min_free_percent: f64,
}

impl FreeSpaceProbe {
    pub fn new(sampler: Arc<dyn ResourceSampler>, path: PathBuf, min_free_percent: f64) -> Self {
        Self {
            sampler,
            path,
            min_free_percent,
        }
    }
}

#[async_trait]
impl Probe for FreeSpaceProbe {
    fn name(&self) -> &'static str {
        "disk_space"
    }

    fn label(&self) -> &'static str {
        "Disk"
    }

    async fn check(&self) -> Result<ProbeResult, ProbeError> {
        let sampler = self.sampler.clone();
        let path = self.path.clone();
        let usage = tokio::task::spawn_blocking(move || sampler.disk_usage(&path))
            .await
            .map_err(|e| ProbeError::Backend(e.to_string()))??;

        let free_percent = usage.free_percent();
        if free_percent > self.min_free_percent {
            Ok(ProbeResult::healthy(format!("Disk OK - {free_percent:.1}% free")))
        } else {
            Ok(ProbeResult::unhealthy(format!(
                "Low disk space - {free_percent:.1}% free"
            )))
        }
    }
}
