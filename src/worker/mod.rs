//! Queue consumers
//!
//! A [`WorkerPool`] runs `concurrency` workers per configured queue. Each
//! worker leases one task at a time from the [`TaskBroker`](crate::queue::TaskBroker),
//! runs the registered handler and acknowledges only after it succeeds.

mod pool;
mod runner;

use std::time::Duration;

pub use pool::WorkerPool;
pub use runner::Worker;

/// Workers consuming one queue
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSpec {
    pub queue: String,
    pub concurrency: usize,
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub pools: Vec<PoolSpec>,
    /// Deliveries before a retryable failure is dead-lettered
    pub max_retries: u32,
    /// Per-worker cap on task starts; `None` means unlimited
    pub rate_limit_per_second: Option<f64>,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Workers silent for longer than this are treated as lost
    pub heartbeat_ttl: Duration,
    /// First delay before replacing a worker that keeps dying
    pub restart_backoff: Duration,
    pub max_restart_backoff: Duration,
}

impl WorkerConfig {
    /// Minimum gap between two task starts of one worker
    pub fn min_task_gap(&self) -> Option<Duration> {
        self.rate_limit_per_second
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|rate| Duration::from_secs_f64(1.0 / rate))
    }

    /// Delay before the `deaths`-th consecutive replacement of a slot
    ///
    /// The first replacement is immediate, later ones back off
    /// exponentially up to `max_restart_backoff`.
    pub fn restart_delay(&self, deaths: u32) -> Duration {
        if deaths <= 1 {
            return Duration::ZERO;
        }
        self.restart_backoff
            .saturating_mul(2u32.saturating_pow(deaths - 2))
            .min(self.max_restart_backoff)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pools: vec![
                PoolSpec {
                    queue: "downloads".into(),
                    concurrency: 2,
                },
                PoolSpec {
                    queue: "cleanup".into(),
                    concurrency: 1,
                },
                PoolSpec {
                    queue: "media".into(),
                    concurrency: 1,
                },
                PoolSpec {
                    queue: "default".into(),
                    concurrency: 1,
                },
            ],
            max_retries: 3,
            rate_limit_per_second: None,
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_ttl: Duration::from_secs(60),
            restart_backoff: Duration::from_millis(500),
            max_restart_backoff: Duration::from_secs(30),
        }
    }
}
