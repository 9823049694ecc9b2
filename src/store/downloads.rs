use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::Result;
use super::keys::{encode_download_key, encode_user_key};
use super::keyspace::FjallStore;
use crate::stats::{DownloadSource, SourceError};

/// Download statuses counted as in flight
pub const ACTIVE_STATUSES: &[&str] = &["pending", "downloading", "processing"];
pub const COMPLETED_STATUS: &str = "completed";

/// Download history entry as seen by the statistics layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub download_type: String,
    pub created_at: DateTime<Utc>,
}

/// Fjall-backed download and user records
///
/// The download pipeline owns these records; this handle only writes what
/// it is handed and answers aggregate queries.
#[derive(Clone)]
pub struct DownloadLedger {
    store: FjallStore,
}

impl DownloadLedger {
    pub fn new(store: FjallStore) -> Self {
        Self { store }
    }

    /// Store or update a download record
    pub fn upsert(&self, record: &DownloadRecord) -> Result<()> {
        let key = encode_download_key(&record.id);
        self.store.downloads.insert(key, serde_json::to_vec(record)?)?;
        debug!(id = %record.id, status = %record.status, "Upserted download record");
        Ok(())
    }

    pub fn register_user(&self, user_id: &str) -> Result<()> {
        self.store.users.insert(encode_user_key(user_id), Vec::<u8>::new())?;
        Ok(())
    }

    fn records(&self) -> Result<Vec<DownloadRecord>> {
        let mut records = Vec::new();
        for item in self.store.downloads.iter() {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn count_where(&self, predicate: impl Fn(&DownloadRecord) -> bool) -> Result<u64> {
        Ok(self.records()?.iter().filter(|r| predicate(r)).count() as u64)
    }

    fn group_by(&self, field: impl Fn(&DownloadRecord) -> &str) -> Result<BTreeMap<String, u64>> {
        let mut groups = BTreeMap::new();
        for record in self.records()? {
            *groups.entry(field(&record).to_string()).or_insert(0) += 1;
        }
        Ok(groups)
    }
}

impl DownloadSource for DownloadLedger {
    fn total_users(&self) -> std::result::Result<u64, SourceError> {
        let mut count = 0;
        for item in self.store.users.iter() {
            item.map_err(crate::store::StoreError::from)?;
            count += 1;
        }
        Ok(count)
    }

    fn total_downloads(&self) -> std::result::Result<u64, SourceError> {
        Ok(self.count_where(|_| true)?)
    }

    fn count_with_status(&self, statuses: &[&str]) -> std::result::Result<u64, SourceError> {
        Ok(self.count_where(|r| statuses.contains(&r.status.as_str()))?)
    }

    fn count_created_on(&self, day: NaiveDate) -> std::result::Result<u64, SourceError> {
        Ok(self.count_where(|r| r.created_at.date_naive() == day)?)
    }

    fn count_by_status(&self) -> std::result::Result<BTreeMap<String, u64>, SourceError> {
        Ok(self.group_by(|r| r.status.as_str())?)
    }

    fn count_by_type(&self) -> std::result::Result<BTreeMap<String, u64>, SourceError> {
        Ok(self.group_by(|r| r.download_type.as_str())?)
    }
}
