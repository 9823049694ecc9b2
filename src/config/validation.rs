use super::models::Config;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Upper bound for the cache probe's sentinel TTL
pub const MAX_CACHE_TTL_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Periodic job '{job}' has non-positive schedule_seconds ({value})")]
    InvalidSchedule { job: String, value: f64 },

    #[error("Duplicate periodic job name '{0}'")]
    DuplicateJobName(String),

    #[error("Queue name {0:?} must be non-empty and must not contain ':'")]
    InvalidQueueName(String),

    #[error("Queue '{queue}' ({source_of}) is not consumed by any worker pool")]
    UnconsumedQueue { queue: String, source_of: String },

    #[error("Worker pool for '{0}' must have concurrency >= 1")]
    InvalidConcurrency(String),

    #[error("workers.prefetch must be >= 1")]
    InvalidPrefetch,

    #[error("workers.max_retries must be >= 1")]
    InvalidMaxRetries,

    #[error("workers.rate_limit_per_second must be positive, got {0}")]
    InvalidRateLimit(f64),

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("{field} must be at most {max}, got {value}")]
    TooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("health.min_free_percent must be within 0..100, got {0}")]
    InvalidMinFreePercent(f64),

    #[error("Retention TTL must be positive: {field} = {value}")]
    InvalidRetentionTTL { field: String, value: u32 },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_health(config)?;
    validate_scheduler(config)?;
    validate_workers(config)?;
    validate_queue_coverage(config)?;
    validate_retention(config)?;
    Ok(())
}

fn validate_health(config: &Config) -> Result<(), ValidationError> {
    let health = &config.health;
    if health.probe_timeout_ms == 0 {
        return Err(ValidationError::NonPositive {
            field: "health.probe_timeout_ms",
        });
    }
    if health.cache_ttl_secs == 0 {
        return Err(ValidationError::NonPositive {
            field: "health.cache_ttl_secs",
        });
    }
    if health.cache_ttl_secs > MAX_CACHE_TTL_SECS {
        return Err(ValidationError::TooLarge {
            field: "health.cache_ttl_secs",
            value: health.cache_ttl_secs,
            max: MAX_CACHE_TTL_SECS,
        });
    }
    if !(0.0..100.0).contains(&health.min_free_percent) {
        return Err(ValidationError::InvalidMinFreePercent(health.min_free_percent));
    }
    Ok(())
}

/// Positive schedules, unique names, sane dispatch settings
fn validate_scheduler(config: &Config) -> Result<(), ValidationError> {
    let scheduler = &config.scheduler;

    if scheduler.tick_ms == 0 {
        return Err(ValidationError::NonPositive {
            field: "scheduler.tick_ms",
        });
    }
    if scheduler.dispatch_attempts == 0 {
        return Err(ValidationError::NonPositive {
            field: "scheduler.dispatch_attempts",
        });
    }

    validate_queue_name(&scheduler.default_queue)?;
    for queue in scheduler.routes.values() {
        validate_queue_name(queue)?;
    }

    let mut names = HashSet::new();
    for job in &scheduler.periodic {
        if !(job.schedule_seconds.is_finite() && job.schedule_seconds > 0.0) {
            return Err(ValidationError::InvalidSchedule {
                job: job.name.clone(),
                value: job.schedule_seconds,
            });
        }
        if !names.insert(job.name.as_str()) {
            return Err(ValidationError::DuplicateJobName(job.name.clone()));
        }
        if let Some(queue) = &job.queue {
            validate_queue_name(queue)?;
        }
    }

    Ok(())
}

fn validate_workers(config: &Config) -> Result<(), ValidationError> {
    let workers = &config.workers;

    if workers.prefetch == 0 {
        return Err(ValidationError::InvalidPrefetch);
    }
    if workers.max_retries == 0 {
        return Err(ValidationError::InvalidMaxRetries);
    }
    if let Some(rate) = workers.rate_limit_per_second {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ValidationError::InvalidRateLimit(rate));
        }
    }
    if workers.poll_interval_ms == 0 {
        return Err(ValidationError::NonPositive {
            field: "workers.poll_interval_ms",
        });
    }
    if workers.heartbeat_ttl_secs == 0 {
        return Err(ValidationError::NonPositive {
            field: "workers.heartbeat_ttl_secs",
        });
    }
    if workers.restart_backoff_ms == 0 {
        return Err(ValidationError::NonPositive {
            field: "workers.restart_backoff_ms",
        });
    }

    for pool in &workers.pools {
        validate_queue_name(&pool.queue)?;
        if pool.concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency(pool.queue.clone()));
        }
    }

    Ok(())
}

/// Every queue a task can be routed to must have a consumer
fn validate_queue_coverage(config: &Config) -> Result<(), ValidationError> {
    let consumed: BTreeSet<&str> = config
        .workers
        .pools
        .iter()
        .map(|pool| pool.queue.as_str())
        .collect();

    let router = config.router();
    let mut produced: Vec<(String, String)> = router
        .queues()
        .into_iter()
        .map(|queue| (queue.to_string(), "route".to_string()))
        .collect();
    for job in &config.scheduler.periodic {
        let queue = job
            .queue
            .clone()
            .unwrap_or_else(|| router.queue_for(&job.task_id).to_string());
        produced.push((queue, format!("periodic job '{}'", job.name)));
    }

    for (queue, source_of) in produced {
        if !consumed.contains(queue.as_str()) {
            return Err(ValidationError::UnconsumedQueue { queue, source_of });
        }
    }

    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.status_ttl_days == 0 {
        return Err(ValidationError::InvalidRetentionTTL {
            field: "status_ttl_days".to_string(),
            value: 0,
        });
    }
    Ok(())
}

fn validate_queue_name(queue: &str) -> Result<(), ValidationError> {
    if queue.is_empty() || queue.contains(':') {
        return Err(ValidationError::InvalidQueueName(queue.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PeriodicJobConfig, PoolConfig};

    #[test]
    fn test_default_config_is_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn test_zero_schedule() {
        let mut config = Config::default();
        config.scheduler.periodic[0].schedule_seconds = 0.0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_duplicate_job_names() {
        let mut config = Config::default();
        let duplicate = config.scheduler.periodic[0].clone();
        config.scheduler.periodic.push(duplicate);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::DuplicateJobName(_))
        ));
    }

    #[test]
    fn test_zero_prefetch() {
        let mut config = Config::default();
        config.workers.prefetch = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidPrefetch)
        ));
    }

    #[test]
    fn test_route_without_consumer() {
        let mut config = Config::default();
        config
            .scheduler
            .routes
            .insert("downloads.transcode".into(), "gpu".into());
        match validate(&config) {
            Err(ValidationError::UnconsumedQueue { queue, .. }) => assert_eq!(queue, "gpu"),
            other => panic!("expected UnconsumedQueue, got {other:?}"),
        }

        config.workers.pools.push(PoolConfig {
            queue: "gpu".into(),
            concurrency: 1,
        });
        validate(&config).unwrap();
    }

    #[test]
    fn test_periodic_queue_without_consumer() {
        let mut config = Config::default();
        config.scheduler.periodic.push(PeriodicJobConfig {
            name: "nightly-report".into(),
            task_id: "reports.nightly".into(),
            schedule_seconds: 86400.0,
            queue: Some("reports".into()),
        });
        assert!(matches!(
            validate(&config),
            Err(ValidationError::UnconsumedQueue { .. })
        ));
    }

    #[test]
    fn test_queue_name_with_separator() {
        let mut config = Config::default();
        config.scheduler.default_queue = "a:b".into();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidQueueName(_))
        ));
    }

    #[test]
    fn test_zero_retention_ttl() {
        let mut config = Config::default();
        config.retention.status_ttl_days = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetentionTTL { .. })
        ));
    }

    #[test]
    fn test_cache_ttl_bounded() {
        let mut config = Config::default();
        config.health.cache_ttl_secs = i64::MAX as u64;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::TooLarge {
                field: "health.cache_ttl_secs",
                ..
            })
        ));

        config.health.cache_ttl_secs = MAX_CACHE_TTL_SECS;
        validate(&config).unwrap();
    }

    #[test]
    fn test_bad_rate_limit() {
        let mut config = Config::default();
        config.workers.rate_limit_per_second = Some(-1.0);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRateLimit(_))
        ));
    }
}
