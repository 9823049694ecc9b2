//! Liveness probes and the aggregated health verdict
//!
//! A [`ProbeRunner`] owns the fixed probe set: `database`, `cache`,
//! `workers` and `disk_space`. Probe errors and timeouts become unhealthy
//! results; they never abort the run.

mod probe;
mod probes;
mod runner;

pub use probe::{Probe, ProbeError, ProbeResult, StorageBackend};
pub use probes::{
    CacheProbe, DEFAULT_MIN_FREE_PERCENT, FreeSpaceProbe, StorageProbe, WorkerPoolProbe,
};
pub use runner::{DEFAULT_PROBE_TIMEOUT, HealthState, OverallHealth, ProbeRunner};
