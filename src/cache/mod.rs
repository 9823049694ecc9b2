//! Key/value cache with per-entry TTL
//!
//! [`CacheBackend`] is the interface the health probe and task handlers
//! depend on; [`MemoryCache`] is the in-process implementation whose expired
//! entries are reclaimed by the periodic cache-expiry sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("invalid TTL: {0:?}")]
    InvalidTtl(Duration),
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Value for `key` unless absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// DashMap-backed cache; expired entries are invisible to `get` and removed
/// by [`MemoryCache::purge_expired`]
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before.saturating_sub(self.entries.len());
        debug!(purged, "Purged expired cache entries");
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl(ttl));
        }
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(CacheError::InvalidTtl(ttl))?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = MemoryCache::new();
        cache.set("health_check", "ok", Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("health_check").await.unwrap().as_deref(), Some("ok"));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_hidden_and_purged() {
        let cache = MemoryCache::new();
        cache.set("short", "v", Duration::from_millis(10)).await.unwrap();
        cache.set("long", "v", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let cache = MemoryCache::new();
        let result = cache.set("k", "v", Duration::ZERO).await;
        assert!(matches!(result, Err(CacheError::InvalidTtl(_))));
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_rejected() {
        let cache = MemoryCache::new();
        let result = cache.set("k", "v", Duration::from_secs(i64::MAX as u64)).await;
        assert!(matches!(result, Err(CacheError::InvalidTtl(_))));
        assert!(cache.is_empty());
    }
}
