use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::queue::QueueError;
use crate::stats::SamplerError;
use crate::store::{FjallStore, StoreError};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Storage(#[from] StoreError),

    #[error("{0}")]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Queue(#[from] QueueError),

    #[error("{0}")]
    Sampler(#[from] SamplerError),

    #[error("{0}")]
    Backend(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("aborted: {0}")]
    Aborted(String),
}

/// Verdict of a single probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub healthy: bool,
    pub message: String,
}

impl ProbeResult {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }

    /// Unhealthy result for a probe that could not complete
    pub fn from_error(label: &str, error: &ProbeError) -> Self {
        Self::unhealthy(format!("{label} Error: {error}"))
    }
}

/// One dependency check
///
/// Implementations must be cancel-safe: the runner drops a probe future
/// once its timeout elapses.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Key in the `checks` map, also the StatusLog component
    fn name(&self) -> &'static str;

    /// Human prefix for error messages
    fn label(&self) -> &'static str;

    async fn check(&self) -> Result<ProbeResult, ProbeError>;
}

/// Persistence layer as seen by the database probe
pub trait StorageBackend: Send + Sync + 'static {
    fn ping(&self) -> Result<(), StoreError>;
}

impl StorageBackend for FjallStore {
    fn ping(&self) -> Result<(), StoreError> {
        FjallStore::ping(self)
    }
}
