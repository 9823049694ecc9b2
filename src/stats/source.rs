use std::collections::BTreeMap;

use chrono::NaiveDate;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("domain store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only aggregate queries over download history
///
/// Category keys are exact-match strings; groupings only contain categories
/// that actually occur.
pub trait DownloadSource: Send + Sync {
    fn total_users(&self) -> Result<u64, SourceError>;

    fn total_downloads(&self) -> Result<u64, SourceError>;

    /// Downloads whose status is any of `statuses`
    fn count_with_status(&self, statuses: &[&str]) -> Result<u64, SourceError>;

    /// Downloads created on the given UTC calendar day
    fn count_created_on(&self, day: NaiveDate) -> Result<u64, SourceError>;

    fn count_by_status(&self) -> Result<BTreeMap<String, u64>, SourceError>;

    fn count_by_type(&self) -> Result<BTreeMap<String, u64>, SourceError>;
}
