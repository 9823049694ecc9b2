use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sampler::{DiskUsage, MemoryStats, ResourceSampler};
use super::source::DownloadSource;
use crate::store::{ACTIVE_STATUSES, COMPLETED_STATUS, StatusLog, StatusRecord};

/// A diagnostics block that is either computed or replaced by its error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Section<T> {
    Ok(T),
    Error { error: String },
}

impl<T> Section<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Section::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Section::Error { .. })
    }

    pub fn ok(&self) -> Option<&T> {
        match self {
            Section::Ok(value) => Some(value),
            Section::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_percent: f32,
    pub memory: MemoryStats,
    pub disk: DiskUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_users: u64,
    pub total_downloads: u64,
    pub active_downloads: u64,
    pub completed_downloads: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub today: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
}

/// Point-in-time diagnostics returned by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Seconds since host boot, 0 when unknown
    pub uptime: f64,
    pub system: Section<SystemStats>,
    pub database: Section<DatabaseStats>,
    pub downloads: Section<DownloadStats>,
    pub components: Section<BTreeMap<String, StatusRecord>>,
}

/// Computes [`StatusSnapshot`]s
///
/// Every block is computed on the blocking pool under its own timeout; one
/// failing block never fails the snapshot.
#[derive(Clone)]
pub struct StatsAggregator {
    sampler: Arc<dyn ResourceSampler>,
    source: Arc<dyn DownloadSource>,
    status_log: StatusLog,
    disk_path: PathBuf,
    block_timeout: Duration,
}

impl StatsAggregator {
    pub fn new(
        sampler: Arc<dyn ResourceSampler>,
        source: Arc<dyn DownloadSource>,
        status_log: StatusLog,
        disk_path: PathBuf,
        block_timeout: Duration,
    ) -> Self {
        Self {
            sampler,
            source,
            status_log,
            disk_path,
            block_timeout,
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let timestamp = Utc::now();

        let (uptime, system, database, downloads, components) = tokio::join!(
            self.uptime(timestamp),
            self.system_stats(),
            self.database_stats(),
            self.download_stats(timestamp),
            self.component_stats(),
        );

        debug!(
            system_ok = !system.is_error(),
            database_ok = !database.is_error(),
            downloads_ok = !downloads.is_error(),
            "Status snapshot computed"
        );

        StatusSnapshot {
            timestamp,
            uptime,
            system,
            database,
            downloads,
            components,
        }
    }

    async fn uptime(&self, now: DateTime<Utc>) -> f64 {
        let sampler = self.sampler.clone();
        match blocking_section(self.block_timeout, move || {
            sampler.boot_time().map_err(|e| e.to_string())
        })
        .await
        {
            Section::Ok(boot) => (now - boot).num_milliseconds().max(0) as f64 / 1000.0,
            Section::Error { error } => {
                warn!(%error, "Uptime unavailable");
                0.0
            }
        }
    }

    async fn system_stats(&self) -> Section<SystemStats> {
        let sampler = self.sampler.clone();
        let disk_path = self.disk_path.clone();
        blocking_section(self.block_timeout, move || {
            Ok(SystemStats {
                cpu_percent: sampler.cpu_percent().map_err(|e| e.to_string())?,
                memory: sampler.memory().map_err(|e| e.to_string())?,
                disk: sampler.disk_usage(&disk_path).map_err(|e| e.to_string())?,
            })
        })
        .await
    }

    async fn database_stats(&self) -> Section<DatabaseStats> {
        let source = self.source.clone();
        blocking_section(self.block_timeout, move || {
            let stats = (|| {
                Ok::<_, super::SourceError>(DatabaseStats {
                    total_users: source.total_users()?,
                    total_downloads: source.total_downloads()?,
                    active_downloads: source.count_with_status(ACTIVE_STATUSES)?,
                    completed_downloads: source.count_with_status(&[COMPLETED_STATUS])?,
                })
            })();
            stats.map_err(|e| e.to_string())
        })
        .await
    }

    async fn download_stats(&self, now: DateTime<Utc>) -> Section<DownloadStats> {
        let source = self.source.clone();
        let today = now.date_naive();
        blocking_section(self.block_timeout, move || {
            let stats = (|| {
                Ok::<_, super::SourceError>(DownloadStats {
                    today: source.count_created_on(today)?,
                    by_status: source.count_by_status()?,
                    by_type: source.count_by_type()?,
                })
            })();
            stats.map_err(|e| e.to_string())
        })
        .await
    }

    async fn component_stats(&self) -> Section<BTreeMap<String, StatusRecord>> {
        let status_log = self.status_log.clone();
        blocking_section(self.block_timeout, move || {
            status_log.latest_per_component().map_err(|e| e.to_string())
        })
        .await
    }
}

/// Run `f` on the blocking pool, mapping errors, panics and timeouts to
/// [`Section::Error`]
async fn blocking_section<T, F>(limit: Duration, f: F) -> Section<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(Ok(value))) => Section::Ok(value),
        Ok(Ok(Err(message))) => Section::error(message),
        Ok(Err(join_error)) => Section::error(format!("sampling task failed: {join_error}")),
        Err(_) => Section::error(format!("timed out after {}ms", limit.as_millis())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{SamplerError, SourceError};
    use crate::store::{ComponentStatus, Details, DownloadRecord, FjallStore};
    use chrono::NaiveDate;
    use std::path::Path;
    use tempfile::TempDir;

    const GB: u64 = 1024 * 1024 * 1024;

    struct FakeSampler;

    impl ResourceSampler for FakeSampler {
        fn cpu_percent(&self) -> Result<f32, SamplerError> {
            Ok(12.5)
        }

        fn memory(&self) -> Result<MemoryStats, SamplerError> {
            Ok(MemoryStats {
                total: 8 * GB,
                available: 6 * GB,
                percent: 25.0,
                used: 2 * GB,
                free: 5 * GB,
            })
        }

        fn disk_usage(&self, _path: &Path) -> Result<DiskUsage, SamplerError> {
            Ok(DiskUsage::from_total_and_free(100 * GB, 40 * GB))
        }

        fn boot_time(&self) -> Result<DateTime<Utc>, SamplerError> {
            Ok(Utc::now() - chrono::Duration::hours(1))
        }
    }

    struct BrokenSampler;

    impl ResourceSampler for BrokenSampler {
        fn cpu_percent(&self) -> Result<f32, SamplerError> {
            Ok(1.0)
        }

        fn memory(&self) -> Result<MemoryStats, SamplerError> {
            Err(SamplerError::MemoryUnavailable)
        }

        fn disk_usage(&self, path: &Path) -> Result<DiskUsage, SamplerError> {
            Err(SamplerError::NoVolume(path.to_path_buf()))
        }

        fn boot_time(&self) -> Result<DateTime<Utc>, SamplerError> {
            Err(SamplerError::BootTimeUnavailable)
        }
    }

    struct UnavailableSource;

    impl DownloadSource for UnavailableSource {
        fn total_users(&self) -> Result<u64, SourceError> {
            Err(SourceError::Unavailable("connection refused".into()))
        }

        fn total_downloads(&self) -> Result<u64, SourceError> {
            Err(SourceError::Unavailable("connection refused".into()))
        }

        fn count_with_status(&self, _statuses: &[&str]) -> Result<u64, SourceError> {
            Err(SourceError::Unavailable("connection refused".into()))
        }

        fn count_created_on(&self, _day: NaiveDate) -> Result<u64, SourceError> {
            Err(SourceError::Unavailable("connection refused".into()))
        }

        fn count_by_status(&self) -> Result<BTreeMap<String, u64>, SourceError> {
            Err(SourceError::Unavailable("connection refused".into()))
        }

        fn count_by_type(&self) -> Result<BTreeMap<String, u64>, SourceError> {
            Err(SourceError::Unavailable("connection refused".into()))
        }
    }

    fn open_store() -> (FjallStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("store")).unwrap();
        (store, temp_dir)
    }

    fn aggregator(
        store: &FjallStore,
        sampler: Arc<dyn ResourceSampler>,
        source: Arc<dyn DownloadSource>,
    ) -> StatsAggregator {
        StatsAggregator::new(
            sampler,
            source,
            store.status_log(),
            PathBuf::from("/"),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_snapshot_with_all_blocks() {
        let (store, _temp) = open_store();
        let ledger = store.downloads();
        ledger
            .upsert(&DownloadRecord {
                id: "d1".into(),
                user_id: "u1".into(),
                status: "completed".into(),
                download_type: "video".into(),
                created_at: Utc::now(),
            })
            .unwrap();
        ledger.register_user("u1").unwrap();
        store
            .status_log()
            .record("cache", ComponentStatus::Healthy, "Cache OK", Details::new())
            .unwrap();

        let snapshot = aggregator(&store, Arc::new(FakeSampler), Arc::new(ledger))
            .snapshot()
            .await;

        assert!(snapshot.uptime >= 3599.0);
        let system = snapshot.system.ok().unwrap();
        assert_eq!(system.cpu_percent, 12.5);
        assert_eq!(system.disk.free, 40 * GB);

        let database = snapshot.database.ok().unwrap();
        assert_eq!(database.total_users, 1);
        assert_eq!(database.completed_downloads, 1);
        assert_eq!(database.active_downloads, 0);

        let downloads = snapshot.downloads.ok().unwrap();
        assert_eq!(downloads.today, 1);
        assert_eq!(downloads.by_status.get("completed"), Some(&1));
        assert_eq!(downloads.by_type.get("video"), Some(&1));

        let components = snapshot.components.ok().unwrap();
        assert_eq!(components["cache"].message, "Cache OK");
    }

    #[tokio::test]
    async fn test_failing_blocks_are_isolated() {
        let (store, _temp) = open_store();

        let snapshot = aggregator(&store, Arc::new(BrokenSampler), Arc::new(UnavailableSource))
            .snapshot()
            .await;

        assert_eq!(snapshot.uptime, 0.0);
        assert!(snapshot.system.is_error());
        assert_eq!(
            snapshot.database,
            Section::error("domain store unavailable: connection refused")
        );
        assert!(snapshot.downloads.is_error());
        assert!(snapshot.components.ok().unwrap().is_empty());
    }

    #[test]
    fn test_error_section_serializes_as_error_object() {
        let section: Section<DatabaseStats> = Section::error("boom");
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json, serde_json::json!({"error": "boom"}));
    }
}
