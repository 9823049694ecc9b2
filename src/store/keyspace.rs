use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::info;

use super::downloads::DownloadLedger;
use super::error::Result;
use super::keys::encode_meta_key;
use super::settings::SettingsStore;
use super::status::StatusLog;

const META_STATUS_SEQ: &str = "status_seq";

/// Fjall-backed persistent storage for settings, status records and
/// download statistics
///
/// Cloning is cheap: every clone shares the same keyspace and counters.
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    pub(crate) settings: PartitionHandle,
    pub(crate) status: PartitionHandle,
    pub(crate) downloads: PartitionHandle,
    pub(crate) users: PartitionHandle,
    pub(crate) metadata: PartitionHandle,
    status_seq: Arc<AtomicU64>,
    last_status_ts: Arc<AtomicI64>,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let settings = keyspace.open_partition("settings", PartitionCreateOptions::default())?;
        let status = keyspace.open_partition("status", PartitionCreateOptions::default())?;
        let downloads = keyspace.open_partition("downloads", PartitionCreateOptions::default())?;
        let users = keyspace.open_partition("users", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(encode_meta_key(META_STATUS_SEQ))?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(status_seq = current_seq, "Fjall store opened");
        Ok(Self {
            keyspace,
            settings,
            status,
            downloads,
            users,
            metadata,
            status_seq: Arc::new(AtomicU64::new(current_seq)),
            last_status_ts: Arc::new(AtomicI64::new(0)),
        })
    }

    /// Repository handle for application settings
    pub fn settings(&self) -> SettingsStore {
        SettingsStore::new(self.clone())
    }

    /// Repository handle for the component status log
    pub fn status_log(&self) -> StatusLog {
        StatusLog::new(self.clone())
    }

    /// Repository handle for download records
    pub fn downloads(&self) -> DownloadLedger {
        DownloadLedger::new(self.clone())
    }

    /// Reserve the next status sequence number and persist the counter
    pub(crate) fn next_status_seq(&self) -> Result<u64> {
        let seq = self.status_seq.fetch_add(1, Ordering::SeqCst);
        self.metadata
            .insert(encode_meta_key(META_STATUS_SEQ), (seq + 1).to_be_bytes())?;
        Ok(seq)
    }

    /// Strictly increasing microsecond timestamp for status records
    ///
    /// Wall clock, bumped by one microsecond whenever the clock has not
    /// advanced past the previous record.
    pub(crate) fn next_status_micros(&self, now_micros: i64) -> i64 {
        let mut prev = self.last_status_ts.load(Ordering::SeqCst);
        loop {
            let next = now_micros.max(prev + 1);
            match self.last_status_ts.compare_exchange(
                prev,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Minimal round trip against the keyspace
    pub fn ping(&self) -> Result<()> {
        let _ = self.metadata.get(encode_meta_key(META_STATUS_SEQ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("store"));
        assert!(store.is_ok());
        assert!(store.unwrap().ping().is_ok());
    }

    #[test]
    fn test_status_seq_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store");

        {
            let store = FjallStore::open(&path).unwrap();
            assert_eq!(store.next_status_seq().unwrap(), 0);
            assert_eq!(store.next_status_seq().unwrap(), 1);
            store.persist().unwrap();
        }

        let store = FjallStore::open(&path).unwrap();
        assert_eq!(store.next_status_seq().unwrap(), 2);
    }

    #[test]
    fn test_status_micros_strictly_increase() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("store")).unwrap();

        let a = store.next_status_micros(1_000);
        let b = store.next_status_micros(1_000);
        let c = store.next_status_micros(500);
        assert_eq!(a, 1_000);
        assert_eq!(b, 1_001);
        assert_eq!(c, 1_002);
    }
}
