//! Configuration management for mediaops
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use mediaops::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MEDIAOPS__<section>__<key>`
//!
//! Examples:
//! - `MEDIAOPS__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `MEDIAOPS__WORKERS__PREFETCH=1`
//! - `MEDIAOPS__RETENTION__STATUS_TTL_DAYS=7`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/mediaops.toml`.
//! This can be overridden using the `MEDIAOPS_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

use std::time::Duration;

pub use models::{
    Config, HealthConfig, MaintenanceConfig, PeriodicJobConfig, PoolConfig, RetentionConfig,
    SchedulerConfig, ServerConfig, WorkersConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

use crate::scheduler::{PeriodicJob, RetryPolicy, SchedulerError, TaskRouter};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Invalid periodic job: {0}")]
    SchedulerError(#[from] SchedulerError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`MEDIAOPS__*`)
    /// 2. TOML file (default: `config/mediaops.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Built-in routes with the configured ones layered on top
    pub fn router(&self) -> TaskRouter {
        let mut router = TaskRouter::with_defaults();
        if router.default_queue() != self.scheduler.default_queue {
            let mut custom = TaskRouter::new(self.scheduler.default_queue.clone());
            for (task_id, queue) in router.routes() {
                custom.insert(task_id.clone(), queue.clone());
            }
            router = custom;
        }
        for (task_id, queue) in &self.scheduler.routes {
            router.insert(task_id.clone(), queue.clone());
        }
        router
    }

    /// The periodic job table, queues resolved through `router`
    pub fn periodic_jobs(&self, router: &TaskRouter) -> Result<Vec<PeriodicJob>, ConfigError> {
        self.scheduler
            .periodic
            .iter()
            .map(|job| -> Result<PeriodicJob, ConfigError> {
                let interval = Duration::try_from_secs_f64(job.schedule_seconds)
                    .map_err(|_| SchedulerError::InvalidInterval(job.name.clone()))?;
                let result = match &job.queue {
                    Some(queue) => PeriodicJob::new(&job.name, &job.task_id, interval, queue),
                    None => PeriodicJob::routed(&job.name, &job.task_id, interval, router),
                };
                Ok(result?)
            })
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.scheduler.dispatch_attempts,
            base_delay: Duration::from_millis(self.scheduler.dispatch_backoff_ms),
        }
    }

    /// Volume watched by the free space probe and the stats endpoint
    pub fn disk_path(&self) -> std::path::PathBuf {
        self.health
            .disk_path
            .clone()
            .unwrap_or_else(|| self.server.data_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
data_dir = "/tmp/mediaops"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.disk_path(), std::path::PathBuf::from("/tmp/mediaops"));
        assert_eq!(config.workers.pools.len(), 4);
    }

    #[test]
    fn test_validation_catches_unconsumed_route() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[[workers.pools]]
queue = "downloads"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::UnconsumedQueue { .. })
        ));
    }

    #[test]
    fn test_oversized_cache_ttl_rejected_at_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[health]
cache_ttl_secs = 9223372036854775807
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_router_layers_configured_routes() {
        let mut config = Config::default();
        config
            .scheduler
            .routes
            .insert("downloads.generate_thumbnail".into(), "default".into());
        config.scheduler.default_queue = "misc".into();

        let router = config.router();
        assert_eq!(router.queue_for("downloads.generate_thumbnail"), "default");
        assert_eq!(router.queue_for("downloads.process_download"), "downloads");
        assert_eq!(router.queue_for("unknown"), "misc");
    }

    #[test]
    fn test_effective_config_renders_as_toml() {
        let rendered = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed.scheduler.periodic, Config::default().scheduler.periodic);
        assert_eq!(parsed.workers.pools, Config::default().workers.pools);
        assert!(parsed.health.disk_path.is_none());
    }

    #[test]
    fn test_periodic_jobs_resolve_queues() {
        let config = Config::default();
        let router = config.router();
        let jobs = config.periodic_jobs(&router).unwrap();

        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].name, "cleanup-old-downloads");
        assert_eq!(jobs[0].queue, "cleanup");
        assert_eq!(jobs[2].interval, Duration::from_secs(1800));
    }
}
