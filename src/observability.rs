//! Process-wide counters for health checks, dispatch and task delivery

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    health_checks: AtomicU64,
    probe_failures: AtomicU64,
    tasks_dispatched: AtomicU64,
    dispatch_retries: AtomicU64,
    dispatch_failures: AtomicU64,
    missed_slots: AtomicU64,
    tasks_acked: AtomicU64,
    tasks_requeued: AtomicU64,
    tasks_dead_lettered: AtomicU64,
    workers_lost: AtomicU64,
}

macro_rules! counter {
    ($method:ident, $field:ident) => {
        pub fn $method(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(counter = stringify!($field), "Metric incremented");
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(health_check_run, health_checks);
    counter!(probe_failed, probe_failures);
    counter!(task_dispatched, tasks_dispatched);
    counter!(dispatch_retried, dispatch_retries);
    counter!(dispatch_failed, dispatch_failures);
    counter!(task_acked, tasks_acked);
    counter!(task_requeued, tasks_requeued);
    counter!(task_dead_lettered, tasks_dead_lettered);
    counter!(worker_lost, workers_lost);

    pub fn slots_missed(&self, count: u64) {
        self.missed_slots.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(counter = "missed_slots", count, "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            health_checks: self.health_checks.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            dispatch_retries: self.dispatch_retries.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            missed_slots: self.missed_slots.load(Ordering::Relaxed),
            tasks_acked: self.tasks_acked.load(Ordering::Relaxed),
            tasks_requeued: self.tasks_requeued.load(Ordering::Relaxed),
            tasks_dead_lettered: self.tasks_dead_lettered.load(Ordering::Relaxed),
            workers_lost: self.workers_lost.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub health_checks: u64,
    pub probe_failures: u64,
    pub tasks_dispatched: u64,
    pub dispatch_retries: u64,
    pub dispatch_failures: u64,
    pub missed_slots: u64,
    pub tasks_acked: u64,
    pub tasks_requeued: u64,
    pub tasks_dead_lettered: u64,
    pub workers_lost: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.task_dispatched();
        metrics.task_dispatched();
        metrics.worker_lost();
        metrics.slots_missed(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_dispatched, 2);
        assert_eq!(snapshot.workers_lost, 1);
        assert_eq!(snapshot.missed_slots, 3);
        assert_eq!(snapshot.tasks_acked, 0);
    }
}
