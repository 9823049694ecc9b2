use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::Result;
use super::keys::encode_setting_key;
use super::keyspace::FjallStore;

/// A single application setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Key-value application settings with upsert semantics
///
/// Each key is a single fjall entry, so concurrent writers on the same key
/// resolve to last-write-wins without corrupting the record.
#[derive(Clone)]
pub struct SettingsStore {
    store: FjallStore,
}

impl SettingsStore {
    pub fn new(store: FjallStore) -> Self {
        Self { store }
    }

    /// Stored value for `key`, or `default` when absent
    ///
    /// Never fails: read errors are logged and answered with the default.
    pub fn get(&self, key: &str, default: &str) -> String {
        match self.try_get(key) {
            Ok(Some(setting)) => setting.value,
            Ok(None) => default.to_string(),
            Err(e) => {
                warn!(key, error = %e, "Failed to read setting, using default");
                default.to_string()
            }
        }
    }

    /// Full setting record, surfacing storage errors
    pub fn try_get(&self, key: &str) -> Result<Option<Setting>> {
        match self.store.settings.get(encode_setting_key(key))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Create or update a setting
    ///
    /// An empty `description` keeps the existing one.
    pub fn set(&self, key: &str, value: &str, description: &str) -> Result<Setting> {
        let now = Utc::now();

        let setting = match self.try_get(key)? {
            Some(mut existing) => {
                existing.value = value.to_string();
                if !description.is_empty() {
                    existing.description = description.to_string();
                }
                existing.updated_at = now;
                existing
            }
            None => Setting {
                key: key.to_string(),
                value: value.to_string(),
                description: description.to_string(),
                created_at: now,
                updated_at: now,
            },
        };

        self.store
            .settings
            .insert(encode_setting_key(key), serde_json::to_vec(&setting)?)?;
        debug!(key, "Upserted setting");
        Ok(setting)
    }

    /// All settings ordered by key
    pub fn list(&self) -> Result<Vec<Setting>> {
        let mut settings = Vec::new();
        for item in self.store.settings.iter() {
            let (_, value) = item?;
            settings.push(serde_json::from_slice(&value)?);
        }
        Ok(settings)
    }
}
