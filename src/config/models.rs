use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::health::{DEFAULT_MIN_FREE_PERCENT, DEFAULT_PROBE_TIMEOUT};
use crate::scheduler::DEFAULT_QUEUE;
use crate::scheduler::routes::{CLEANUP_OLD_FILES, CLEAR_EXPIRED_CACHE, UPDATE_DEPENDENCIES};
use crate::worker::{PoolSpec, WorkerConfig};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root of the fjall keyspaces (`store/` and `queue/` below it)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
        }
    }
}

impl ServerConfig {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue")
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Health probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Volume checked by the free space probe; defaults to the data dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_path: Option<PathBuf>,
    #[serde(default = "default_min_free_percent")]
    pub min_free_percent: f64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Append every probe outcome to the status log
    #[serde(default = "default_true")]
    pub record_status: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            disk_path: None,
            min_free_percent: default_min_free_percent(),
            cache_ttl_secs: default_cache_ttl_secs(),
            record_status: true,
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT.as_millis() as u64
}

fn default_min_free_percent() -> f64 {
    DEFAULT_MIN_FREE_PERCENT
}

fn default_cache_ttl_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Recurring job as written in the config file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PeriodicJobConfig {
    pub name: String,
    pub task_id: String,
    pub schedule_seconds: f64,
    /// Routed through the task router when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_queue")]
    pub default_queue: String,
    #[serde(default = "default_dispatch_attempts")]
    pub dispatch_attempts: u32,
    #[serde(default = "default_dispatch_backoff_ms")]
    pub dispatch_backoff_ms: u64,
    /// Added to, or overriding, the built-in routes
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
    /// Replaces the built-in job table
    #[serde(default = "default_periodic")]
    pub periodic: Vec<PeriodicJobConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            default_queue: default_queue(),
            routes: BTreeMap::new(),
            periodic: default_periodic(),
            dispatch_attempts: default_dispatch_attempts(),
            dispatch_backoff_ms: default_dispatch_backoff_ms(),
        }
    }
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

fn default_periodic() -> Vec<PeriodicJobConfig> {
    vec![
        PeriodicJobConfig {
            name: "cleanup-old-downloads".into(),
            task_id: CLEANUP_OLD_FILES.into(),
            schedule_seconds: 3600.0,
            queue: None,
        },
        PeriodicJobConfig {
            name: "update-dependencies".into(),
            task_id: UPDATE_DEPENDENCIES.into(),
            schedule_seconds: 86400.0,
            queue: None,
        },
        PeriodicJobConfig {
            name: "cache-expiry-sweep".into(),
            task_id: CLEAR_EXPIRED_CACHE.into(),
            schedule_seconds: 1800.0,
            queue: None,
        },
    ]
}

fn default_dispatch_attempts() -> u32 {
    3
}

fn default_dispatch_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PoolConfig {
    pub queue: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    /// Unacknowledged tasks a worker may hold
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_second: Option<f64>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_heartbeat_ttl_secs")]
    pub heartbeat_ttl_secs: u64,
    /// First delay before replacing a worker that keeps dying
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    #[serde(default = "default_max_restart_backoff_secs")]
    pub max_restart_backoff_secs: u64,
    #[serde(default = "default_pools")]
    pub pools: Vec<PoolConfig>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            pools: default_pools(),
            prefetch: default_prefetch(),
            max_retries: default_max_retries(),
            rate_limit_per_second: None,
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_ttl_secs: default_heartbeat_ttl_secs(),
            restart_backoff_ms: default_restart_backoff_ms(),
            max_restart_backoff_secs: default_max_restart_backoff_secs(),
        }
    }
}

impl WorkersConfig {
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }

    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            pools: self
                .pools
                .iter()
                .map(|pool| PoolSpec {
                    queue: pool.queue.clone(),
                    concurrency: pool.concurrency,
                })
                .collect(),
            max_retries: self.max_retries,
            rate_limit_per_second: self.rate_limit_per_second,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_interval: self.heartbeat_ttl() / 3,
            heartbeat_ttl: self.heartbeat_ttl(),
            restart_backoff: Duration::from_millis(self.restart_backoff_ms),
            max_restart_backoff: Duration::from_secs(self.max_restart_backoff_secs),
        }
    }
}

fn default_pools() -> Vec<PoolConfig> {
    WorkerConfig::default()
        .pools
        .into_iter()
        .map(|pool| PoolConfig {
            queue: pool.queue,
            concurrency: pool.concurrency,
        })
        .collect()
}

fn default_prefetch() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_heartbeat_ttl_secs() -> u64 {
    60
}

fn default_restart_backoff_ms() -> u64 {
    500
}

fn default_max_restart_backoff_secs() -> u64 {
    30
}

/// Retention policy for the status log
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_status_ttl_days")]
    pub status_ttl_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            status_ttl_days: default_status_ttl_days(),
        }
    }
}

impl RetentionConfig {
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.status_ttl_days) * 86400)
    }
}

fn default_status_ttl_days() -> u32 {
    30
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    /// Program and arguments run by the dependency update job
    #[serde(default)]
    pub dependency_update_command: Vec<String>,
}
