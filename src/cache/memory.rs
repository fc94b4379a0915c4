//! In-Memory Tier
//!
//! Bounded, TTL-aware LRU map held in process memory. Fastest and volatile.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` guards the map and the recency index; critical
//!   sections never do I/O
//! - Recency is a monotonic logical clock, so two entries never share an
//!   LRU position
//! - Expiration is lazy on `get`; at capacity, expired entries are dropped
//!   before any live entry is evicted

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::config::{CacheConfig, CacheKind, DEFAULT_LOCK_TIMEOUT_MS};
use super::entry::{now_millis, promotion_replaces, valid_key, CacheEntry};
use super::metrics::{CacheStats, StatsTracker};
use super::policy::Expiry;
use super::provider::CacheProvider;
use crate::error::{Error, Result};

const TIER: &str = "memory";

struct Slot {
    entry: CacheEntry,
    /// Position in the recency index
    tick: u64,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Slot>,
    /// Logical access time -> key, oldest first
    recency: BTreeMap<u64, String>,
    clock: u64,
    /// Entries carrying a TTL; lets the capacity path skip the expiry scan
    expiring: usize,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.map.remove(key)?;
        self.recency.remove(&slot.tick);
        if slot.entry.ttl_ms().is_some() {
            self.expiring -= 1;
        }
        Some(slot)
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        self.remove(&key);
        let tick = self.next_tick();
        if entry.ttl_ms().is_some() {
            self.expiring += 1;
        }
        self.recency.insert(tick, key.clone());
        self.map.insert(key, Slot { entry, tick });
    }

    /// Move `key` to the most-recently-used position
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick();
        if let Some(slot) = self.map.get_mut(key) {
            slot.entry.touch();
            let old = std::mem::replace(&mut slot.tick, tick);
            self.recency.remove(&old);
            self.recency.insert(tick, key.to_string());
        }
    }

    fn purge_expired(&mut self, now_ms: i64) -> usize {
        if self.expiring == 0 {
            return 0;
        }
        let expired: Vec<String> = self
            .map
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now_ms))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        if let Some(slot) = self.map.remove(&key) {
            if slot.entry.ttl_ms().is_some() {
                self.expiring -= 1;
            }
        }
        Some(key)
    }

    fn clear(&mut self) {
        self.map.clear();
        self.recency.clear();
        self.expiring = 0;
    }
}

/// In-memory LRU tier
pub struct MemoryCache {
    inner: Mutex<Inner>,
    max_entries: Option<usize>,
    default_ttl: Option<Duration>,
    lock_timeout: Duration,
    /// Mirror of the map length so stats never take the lock
    len: AtomicU64,
    closed: AtomicBool,
    stats: StatsTracker,
}

impl MemoryCache {
    /// Create a memory tier
    ///
    /// A capacity or TTL of zero is rejected with `Error::Config`.
    pub fn new(max_entries: Option<usize>, default_ttl: Option<Duration>) -> Result<Self> {
        if max_entries == Some(0) {
            return Err(Error::Config(
                "memory tier: max_entries must be greater than zero".to_string(),
            ));
        }
        if default_ttl == Some(Duration::ZERO) {
            return Err(Error::Config(
                "memory tier: default TTL must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            inner: Mutex::new(Inner::default()),
            max_entries,
            default_ttl,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            len: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stats: StatsTracker::new(),
        })
    }

    /// Create from a validated `memory` config
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.max_entries, config.default_ttl())?
            .with_lock_timeout(config.lock_timeout()))
    }

    /// Unbounded tier without a default TTL
    pub fn unbounded() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: None,
            default_ttl: None,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            len: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stats: StatsTracker::new(),
        }
    }

    /// Override the bounded lock wait
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn lock(&self) -> Option<MutexGuard<'_, Inner>> {
        self.inner.try_lock_for(self.lock_timeout)
    }

    fn lock_timeout_error(&self) -> Error {
        Error::LockTimeout {
            tier: TIER.to_string(),
            waited_ms: self.lock_timeout.as_millis() as u64,
        }
    }

    fn sync_len(&self, inner: &Inner) {
        self.len.store(inner.map.len() as u64, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Validate the key and take the lock for a write
    fn lock_for_write(&self, key: &str) -> Result<MutexGuard<'_, Inner>> {
        if !valid_key(key) {
            return Err(Error::write(TIER, "empty key"));
        }
        if self.is_closed() {
            return Err(Error::Closed {
                tier: TIER.to_string(),
            });
        }
        self.lock().ok_or_else(|| self.lock_timeout_error())
    }

    /// Insert under the held lock, making room first when at capacity
    fn store(&self, inner: &mut Inner, key: &str, entry: CacheEntry) {
        if let Some(max) = self.max_entries {
            if !inner.map.contains_key(key) && inner.map.len() >= max {
                let expired = inner.purge_expired(now_millis());
                self.stats.record_expirations(expired as u64);

                while inner.map.len() >= max {
                    match inner.evict_lru() {
                        Some(evicted) => {
                            self.stats.record_eviction();
                            debug!(tier = TIER, key = %evicted, "evicted least recently used entry");
                        }
                        None => break,
                    }
                }
            }
        }

        inner.insert(key.to_string(), entry);
        self.sync_len(inner);
        self.stats.record_set();
    }

    /// Check presence without touching recency or counters
    pub fn contains(&self, key: &str) -> bool {
        match self.lock() {
            Some(inner) => inner
                .map
                .get(key)
                .is_some_and(|slot| !slot.entry.is_expired()),
            None => false,
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity
    pub fn capacity(&self) -> Option<usize> {
        self.max_entries
    }

    /// Configured default TTL
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }
}

impl CacheProvider for MemoryCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Memory
    }

    fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let Some(mut inner) = self.lock() else {
            warn!(tier = TIER, key, "lock wait exceeded on get, reporting miss");
            self.stats.record_miss();
            return None;
        };

        let now = now_millis();
        let expired = match inner.map.get(key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(slot) => slot.entry.is_expired_at(now),
        };

        if expired {
            inner.remove(key);
            self.sync_len(&inner);
            self.stats.record_expiration();
            self.stats.record_miss();
            debug!(tier = TIER, key, "entry expired");
            return None;
        }

        inner.touch(key);
        self.stats.record_hit();
        inner.map.get(key).map(|slot| slot.entry.clone())
    }

    fn set(&self, key: &str, value: Bytes, ttl: Expiry) -> Result<()> {
        let mut inner = self.lock_for_write(key)?;
        let entry = CacheEntry::new(value, ttl.resolve(self.default_ttl));
        self.store(&mut inner, key, entry);
        Ok(())
    }

    fn promote(&self, key: &str, entry: &CacheEntry) -> Result<bool> {
        let mut inner = self.lock_for_write(key)?;

        let now = now_millis();
        if entry.is_expired_at(now) {
            return Ok(false);
        }
        if let Some(slot) = inner.map.get(key) {
            let stored = &slot.entry;
            if !promotion_replaces(entry.created_at_ms(), stored.created_at_ms(), stored.ttl_ms(), now) {
                return Ok(false);
            }
        }

        self.store(&mut inner, key, entry.promoted_copy(self.default_ttl, now));
        Ok(true)
    }

    fn remove(&self, key: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(mut inner) = self.lock() else {
            return false;
        };
        let removed = inner.remove(key).is_some();
        self.sync_len(&inner);
        removed
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.lock().ok_or_else(|| self.lock_timeout_error())?;
        inner.clear();
        self.sync_len(&inner);
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let purged = inner.purge_expired(now_millis());
        self.sync_len(&inner);
        self.stats.record_expirations(purged as u64);
        purged
    }

    fn entries(&self) -> Result<Vec<(String, CacheEntry)>> {
        if self.is_closed() {
            return Err(Error::Closed {
                tier: TIER.to_string(),
            });
        }
        let inner = self.lock().ok_or_else(|| self.lock_timeout_error())?;
        let now = now_millis();
        let mut entries: Vec<(String, CacheEntry)> = inner
            .map
            .iter()
            .filter(|(_, slot)| !slot.entry.is_expired_at(now))
            .map(|(key, slot)| (key.clone(), slot.entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn stats(&self) -> CacheStats {
        let mut stats = self.stats.snapshot(CacheKind::Memory, self.len() as u64);
        stats.max_entries = self.max_entries.map(|max| max as u64);
        stats.default_ttl_seconds = self.default_ttl.map(|ttl| ttl.as_secs());
        stats
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.clear()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
