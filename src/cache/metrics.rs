//! Cache Statistics
//!
//! Lock-free counters per cache instance. Reading a snapshot never touches a
//! tier lock.
//!
//! Persistent tiers carry their counters across restarts: they seed the
//! tracker from storage with [`StatsTracker::restore`] and periodically write
//! back what [`StatsTracker::take_unflushed`] hands them.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::config::CacheKind;

/// Names of the persisted counters, in storage order
pub const COUNTER_NAMES: [&str; 5] = ["hits", "misses", "sets", "evictions", "expirations"];

/// Plain counter values, as stored by the persistent tiers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl Counters {
    /// `(name, value)` pairs in [`COUNTER_NAMES`] order
    pub fn named(&self) -> [(&'static str, u64); 5] {
        [
            ("hits", self.hits),
            ("misses", self.misses),
            ("sets", self.sets),
            ("evictions", self.evictions),
            ("expirations", self.expirations),
        ]
    }

    /// Set a counter by name; unknown names are ignored
    pub fn set_named(&mut self, name: &str, value: u64) {
        match name {
            "hits" => self.hits = value,
            "misses" => self.misses = value,
            "sets" => self.sets = value,
            "evictions" => self.evictions = value,
            "expirations" => self.expirations = value,
            _ => {}
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self {
            hits: self.hits.saturating_add(other.hits),
            misses: self.misses.saturating_add(other.misses),
            sets: self.sets.saturating_add(other.sets),
            evictions: self.evictions.saturating_add(other.evictions),
            expirations: self.expirations.saturating_add(other.expirations),
        }
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self {
            hits: self.hits.saturating_sub(other.hits),
            misses: self.misses.saturating_sub(other.misses),
            sets: self.sets.saturating_sub(other.sets),
            evictions: self.evictions.saturating_sub(other.evictions),
            expirations: self.expirations.saturating_sub(other.expirations),
        }
    }
}

/// Counter set for one cache instance
#[derive(Debug, Default)]
pub struct StatsTracker {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    promotions: AtomicU64,
    promotion_failures: AtomicU64,
    /// Counter values already written to durable storage
    flushed: Mutex<Counters>,
}

impl StatsTracker {
    /// Create a new tracker with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sets(&self, count: u64) {
        self.sets.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion_failure(&self) {
        self.promotion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn promotion_failures(&self) -> u64 {
        self.promotion_failures.load(Ordering::Relaxed)
    }

    /// Current values of the persisted counters
    pub fn counters(&self) -> Counters {
        Counters {
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets(),
            evictions: self.evictions(),
            expirations: self.expirations(),
        }
    }

    /// Add counters loaded from storage; they count as already flushed
    pub fn restore(&self, stored: Counters) {
        let mut flushed = self.flushed.lock();
        self.hits.fetch_add(stored.hits, Ordering::Relaxed);
        self.misses.fetch_add(stored.misses, Ordering::Relaxed);
        self.sets.fetch_add(stored.sets, Ordering::Relaxed);
        self.evictions.fetch_add(stored.evictions, Ordering::Relaxed);
        self.expirations.fetch_add(stored.expirations, Ordering::Relaxed);
        *flushed = flushed.saturating_add(stored);
    }

    /// Increments not yet written to storage; marks them as written
    pub fn take_unflushed(&self) -> Counters {
        let mut flushed = self.flushed.lock();
        let current = self.counters();
        let delta = current.saturating_sub(*flushed);
        *flushed = current;
        delta
    }

    /// Hand back increments whose write failed so the next flush retries them
    pub fn return_unflushed(&self, delta: Counters) {
        let mut flushed = self.flushed.lock();
        *flushed = flushed.saturating_sub(delta);
    }

    /// Hit ratio over all lookups (0.0 when nothing was looked up)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Build a stats snapshot; tier-specific fields start empty
    pub fn snapshot(&self, kind: CacheKind, size: u64) -> CacheStats {
        CacheStats {
            kind,
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets(),
            evictions: self.evictions(),
            expirations: self.expirations(),
            size,
            hit_rate: self.hit_ratio(),
            promotions: self.promotions(),
            promotion_failures: self.promotion_failures(),
            max_entries: None,
            default_ttl_seconds: None,
            pending_expired: None,
            location: None,
            tiers: Vec::new(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.promotion_failures.store(0, Ordering::Relaxed);
        *self.flushed.lock() = Counters::default();
    }
}

/// Snapshot of a cache's statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub kind: CacheKind,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Live entry count (physically stored; may include not-yet-swept expired rows)
    pub size: u64,
    pub hit_rate: f64,
    /// Lower-tier hits copied into faster tiers (tiered caches only)
    pub promotions: u64,
    pub promotion_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_ttl_seconds: Option<u64>,
    /// Stored entries already past their TTL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_expired: Option<u64>,
    /// Backing directory or database path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Per-tier stats, fastest first (tiered caches only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<CacheStats>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_creation() {
        let stats = StatsTracker::new();
        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_tracking() {
        let stats = StatsTracker::new();

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert!((stats.hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_snapshot() {
        let stats = StatsTracker::new();
        stats.record_set();
        stats.record_sets(2);
        stats.record_eviction();
        stats.record_expirations(4);
        stats.record_promotion();

        let snapshot = stats.snapshot(CacheKind::Memory, 7);
        assert_eq!(snapshot.kind, CacheKind::Memory);
        assert_eq!(snapshot.sets, 3);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.expirations, 4);
        assert_eq!(snapshot.promotions, 1);
        assert_eq!(snapshot.size, 7);
        assert!(snapshot.tiers.is_empty());
    }

    #[test]
    fn test_reset() {
        let stats = StatsTracker::new();
        stats.record_hit();
        stats.record_miss();
        stats.record_promotion_failure();

        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.promotion_failures(), 0);
    }

    #[test]
    fn test_restored_counters_are_not_flushed_again() {
        let stats = StatsTracker::new();
        stats.restore(Counters {
            hits: 5,
            sets: 2,
            ..Default::default()
        });
        assert_eq!(stats.hits(), 5);
        assert!(stats.take_unflushed().is_zero());

        stats.record_hit();
        stats.record_set();
        let delta = stats.take_unflushed();
        assert_eq!(delta.hits, 1);
        assert_eq!(delta.sets, 1);
        assert!(stats.take_unflushed().is_zero());
    }

    #[test]
    fn test_returned_delta_is_retried() {
        let stats = StatsTracker::new();
        stats.record_miss();
        let delta = stats.take_unflushed();

        stats.return_unflushed(delta);
        stats.record_miss();
        assert_eq!(stats.take_unflushed().misses, 2);
    }

    #[test]
    fn test_counters_by_name() {
        let mut counters = Counters::default();
        for (index, name) in COUNTER_NAMES.iter().enumerate() {
            counters.set_named(name, index as u64 + 1);
        }
        counters.set_named("unknown", 99);

        assert_eq!(counters.named().map(|(_, v)| v), [1, 2, 3, 4, 5]);
        assert_eq!(counters.named().map(|(n, _)| n), COUNTER_NAMES);
    }

    #[test]
    fn test_snapshot_serializes_without_empty_fields() {
        let snapshot = StatsTracker::new().snapshot(CacheKind::File, 0);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["kind"], "file");
        assert!(json.get("tiers").is_none());
        assert!(json.get("location").is_none());
    }
}
