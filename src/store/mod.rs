//! Fjall-based persistence for settings, component status and download
//! statistics
//!
//! One keyspace backs every repository handle:
//!
//! - [`SettingsStore`]: typed key/value application settings (upsert)
//! - [`StatusLog`]: append-only component health observations
//! - [`DownloadLedger`]: download/user records read by the stats layer
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mediaops::store::{ComponentStatus, Details, FjallStore};
//!
//! let store = FjallStore::open("data/store")?;
//! store.settings().set("max_quality", "1080p", "")?;
//! store.status_log().record("cache", ComponentStatus::Error, "timeout", Details::new())?;
//! let latest = store.status_log().latest("cache")?;
//! ```

pub mod downloads;
pub mod error;
pub mod keys;
pub mod keyspace;
pub mod settings;
pub mod status;

pub use downloads::{ACTIVE_STATUSES, COMPLETED_STATUS, DownloadLedger, DownloadRecord};
pub use error::{Result, StoreError};
pub use keyspace::FjallStore;
pub use settings::{Setting, SettingsStore};
pub use status::{ComponentStatus, Details, StatusLog, StatusRecord};
