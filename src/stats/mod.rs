//! System and domain statistics for the diagnostics endpoint
//!
//! Descriptive numbers only, no verdict. See [`StatsAggregator`].

mod aggregator;
mod sampler;
mod source;

pub use aggregator::{
    DatabaseStats, DownloadStats, Section, StatsAggregator, StatusSnapshot, SystemStats,
};
pub use sampler::{DiskUsage, MemoryStats, ResourceSampler, SamplerError, SysinfoSampler};
pub use source::{DownloadSource, SourceError};
