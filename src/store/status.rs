use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::error::{Result, StoreError};
use super::keys::{
    STATUS_KEY_PREFIX, decode_status_key, encode_status_key, encode_status_prefix,
    encode_status_successor,
};
use super::keyspace::FjallStore;

/// Schema-less, insertion-ordered attributes attached to a status record
pub type Details = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Warning,
    Error,
    Maintenance,
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Warning => "warning",
            ComponentStatus::Error => "error",
            ComponentStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// Immutable health observation for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub component: String,
    pub status: ComponentStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Details,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
}

/// Append-only log of component status observations
#[derive(Clone)]
pub struct StatusLog {
    store: FjallStore,
}

impl StatusLog {
    pub fn new(store: FjallStore) -> Self {
        Self { store }
    }

    /// Append a new record stamped with the current time
    pub fn record(
        &self,
        component: &str,
        status: ComponentStatus,
        message: &str,
        details: Details,
    ) -> Result<StatusRecord> {
        validate_component(component)?;

        let ts_micros = self.store.next_status_micros(Utc::now().timestamp_micros());
        let timestamp = DateTime::<Utc>::from_timestamp_micros(ts_micros)
            .ok_or_else(|| StoreError::InvalidKey(format!("timestamp {ts_micros}")))?;
        let seq = self.store.next_status_seq()?;

        let record = StatusRecord {
            component: component.to_string(),
            status,
            message: message.to_string(),
            details,
            timestamp,
            seq,
        };

        let key = encode_status_key(component, ts_micros, seq);
        self.store.status.insert(key, serde_json::to_vec(&record)?)?;
        debug!(component, %status, seq, "Recorded component status");
        Ok(record)
    }

    /// Most recent record for `component`, `None` if it never reported
    pub fn latest(&self, component: &str) -> Result<Option<StatusRecord>> {
        validate_component(component)?;
        self.last_under(encode_status_prefix(component))
    }

    /// Latest record of every component that ever reported
    ///
    /// Seeks from one component's key range to the next, so the cost grows
    /// with the number of components rather than the number of records.
    pub fn latest_per_component(&self) -> Result<BTreeMap<String, StatusRecord>> {
        let mut latest = BTreeMap::new();
        let mut cursor = STATUS_KEY_PREFIX.as_bytes().to_vec();

        loop {
            let Some(item) = self.store.status.range(cursor.clone()..).next() else {
                break;
            };
            let (key, _) = item?;

            let Some((component, _, _)) = decode_status_key(&key) else {
                cursor = key.to_vec();
                cursor.push(0);
                continue;
            };

            if let Some(record) = self.last_under(encode_status_prefix(&component))? {
                latest.insert(component.clone(), record);
            }
            cursor = encode_status_successor(&component);
        }

        Ok(latest)
    }

    fn last_under(&self, prefix: Vec<u8>) -> Result<Option<StatusRecord>> {
        match self.store.status.prefix(prefix).next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(serde_json::from_slice(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Remove records older than `cutoff`, keeping each component's latest
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_micros = cutoff.timestamp_micros();
        let mut to_remove = Vec::new();
        let mut prev: Option<(String, i64, Vec<u8>)> = None;

        for item in self.store.status.iter() {
            let (key, _) = item?;
            let Some((component, ts, _)) = decode_status_key(&key) else {
                continue;
            };

            if let Some((prev_component, prev_ts, prev_key)) = prev.take() {
                if prev_component == component && prev_ts < cutoff_micros {
                    to_remove.push(prev_key);
                }
            }
            prev = Some((component, ts, key.to_vec()));
        }

        for key in &to_remove {
            self.store.status.remove(key.as_slice())?;
        }

        info!(pruned = to_remove.len(), %cutoff, "Pruned status records");
        Ok(to_remove.len())
    }
}

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty() || component.contains(':') {
        return Err(StoreError::InvalidComponent(component.to_string()));
    }
    Ok(())
}
