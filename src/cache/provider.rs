//! Cache Provider Interface
//!
//! The one capability set shared by every tier and by the tiered cache.
//! Consumers hold an `Arc<dyn CacheProvider>` and never care which backend
//! sits behind it.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::config::CacheKind;
use super::entry::CacheEntry;
use super::metrics::CacheStats;
use super::policy::Expiry;
use crate::error::{Error, Result};

/// A cache tier or tier stack
///
/// Reads never fail: any fault while reading is logged and reported as a
/// miss. Writes return an error the caller is free to ignore; a failed `set`
/// only means the value was not cached.
pub trait CacheProvider: Send + Sync {
    /// Backend kind
    fn kind(&self) -> CacheKind;

    /// Look up a live (non-expired) entry with its creation time and TTL
    ///
    /// Counts one hit or miss, exactly like `get`.
    fn get_entry(&self, key: &str) -> Option<CacheEntry>;

    /// Look up a live (non-expired) value
    fn get(&self, key: &str) -> Option<Bytes> {
        self.get_entry(key).map(CacheEntry::into_value)
    }

    /// Store a value, fully replacing any previous entry for `key`
    fn set(&self, key: &str, value: Bytes, ttl: Expiry) -> Result<()>;

    /// Store a copy of an entry found in a slower tier
    ///
    /// The copy keeps the entry's creation time and expires no later than
    /// the original. The check and the write are atomic per tier: nothing is
    /// stored (`Ok(false)`) when the entry has expired or the tier already
    /// holds a live entry at least as new.
    fn promote(&self, key: &str, entry: &CacheEntry) -> Result<bool>;

    /// Drop a single key; true if an entry was removed
    fn remove(&self, key: &str) -> bool;

    /// Drop a batch of keys; returns how many entries were removed
    fn invalidate(&self, keys: &[&str]) -> usize {
        keys.iter().filter(|key| self.remove(key)).count()
    }

    /// Seed the cache with known values using the default TTL
    ///
    /// Returns how many items were stored. Fails only when the batch was
    /// non-empty and every item failed.
    fn pre_warm(&self, items: Vec<(String, Bytes)>) -> Result<usize> {
        let total = items.len();
        let mut stored = 0;
        let mut last_error = None;

        for (key, value) in items {
            match self.set(&key, value, Expiry::Default) {
                Ok(()) => stored += 1,
                Err(e) => {
                    warn!(cache = %self.kind(), key = %key, "pre-warm write failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        debug!(cache = %self.kind(), stored, total, "pre-warmed cache");
        match last_error {
            Some(e) if stored == 0 => Err(e),
            _ => Ok(stored),
        }
    }

    /// Remove every entry
    fn clear(&self) -> Result<()>;

    /// Eagerly delete entries past their TTL; returns how many were removed
    fn purge_expired(&self) -> usize;

    /// Every live entry, ordered by key
    fn entries(&self) -> Result<Vec<(String, CacheEntry)>>;

    /// Statistics snapshot
    fn stats(&self) -> CacheStats;

    /// Release handles and connections; later writes fail, later reads miss
    fn close(&self) -> Result<()>;
}

/// Typed helpers on top of the byte-level interface
pub trait CacheProviderExt: CacheProvider {
    /// Look up and deserialize a JSON value; undecodable payloads are misses
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(cache = %self.kind(), key, "cached payload is not valid JSON: {}", e);
                None
            }
        }
    }

    /// Serialize a value as JSON and store it
    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Expiry) -> Result<()> {
        let raw = serde_json::to_vec(value).map_err(|e| Error::write(self.kind().to_string(), e))?;
        self.set(key, Bytes::from(raw), ttl)
    }
}

impl<C: CacheProvider + ?Sized> CacheProviderExt for C {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct FileAnalysis {
        file_type: String,
        language: String,
        confidence: f64,
    }

    #[test]
    fn test_json_round_trip_through_trait_object() {
        let cache: Arc<dyn CacheProvider> = Arc::new(MemoryCache::unbounded());
        let analysis = FileAnalysis {
            file_type: "code".into(),
            language: "python".into(),
            confidence: 0.95,
        };

        cache.set_json("main.py:abc123", &analysis, Expiry::Default).unwrap();
        let restored: FileAnalysis = cache.get_json("main.py:abc123").unwrap();
        assert_eq!(restored, analysis);
    }

    #[test]
    fn test_get_json_on_garbage_is_miss() {
        let cache = MemoryCache::unbounded();
        cache
            .set("k", Bytes::from_static(b"\xff not json"), Expiry::Default)
            .unwrap();
        assert!(cache.get_json::<FileAnalysis>("k").is_none());
    }

    #[test]
    fn test_invalidate_counts_removed_keys() {
        let cache = MemoryCache::unbounded();
        cache.set("a", Bytes::from_static(b"1"), Expiry::Default).unwrap();
        cache.set("b", Bytes::from_static(b"2"), Expiry::Default).unwrap();

        assert_eq!(cache.invalidate(&["a", "b", "missing"]), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_pre_warm_counts_and_partial_failure() {
        let cache = MemoryCache::unbounded();
        let stored = cache
            .pre_warm(vec![
                ("python_script".to_string(), Bytes::from_static(b"{}")),
                (String::new(), Bytes::from_static(b"{}")),
                ("markdown_doc".to_string(), Bytes::from_static(b"{}")),
            ])
            .unwrap();

        assert_eq!(stored, 2);
        assert!(cache.get("python_script").is_some());
    }

    #[test]
    fn test_pre_warm_all_failed_is_error() {
        let cache = MemoryCache::unbounded();
        assert!(cache
            .pre_warm(vec![(String::new(), Bytes::from_static(b"x"))])
            .is_err());
        assert_eq!(cache.pre_warm(Vec::new()).unwrap(), 0);
    }
}
