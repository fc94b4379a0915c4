//! Cache Manager - Tiered Combinator
//!
//! Composes an ordered list of tiers, fastest first, behind the same
//! [`CacheProvider`] interface the tiers expose.
//!
//! # Design
//!
//! - **Read-through**: `get` checks tiers in order and stops at the first hit
//! - **Promotion**: a hit at tier `i` is copied into tiers `0..i`, keeping
//!   the creation time and TTL of the copy that was found. A tier never lets
//!   a promoted copy replace a live entry at least as new, so a background
//!   promotion cannot undo a later `set`
//! - **Write-through**: `set` writes every tier and fails only if all fail
//! - **No extra locking**: each tier arbitrates its own concurrency
//!
//! A `remove` racing a background promotion of the same key can leave the
//! promoted copy behind until it expires.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::config::CacheKind;
use super::entry::CacheEntry;
use super::metrics::{CacheStats, StatsTracker};
use super::policy::{Expiry, PromotionMode};
use super::provider::CacheProvider;
use crate::error::{Error, Result};

fn describe(index: usize, tier: &dyn CacheProvider, err: &Error) -> String {
    format!("tier {} ({}): {}", index, tier.kind(), err)
}

/// Copy an entry found in a slower tier into every faster tier
fn promote(
    tiers: &[Arc<dyn CacheProvider>],
    stats: &StatsTracker,
    key: &str,
    entry: &CacheEntry,
) {
    for (index, tier) in tiers.iter().enumerate() {
        match tier.promote(key, entry) {
            Ok(true) => stats.record_promotion(),
            Ok(false) => trace!(key, tier = index, "faster tier kept its own entry"),
            Err(e) => {
                stats.record_promotion_failure();
                warn!(key, "promotion failed: {}", describe(index, tier.as_ref(), &e));
            }
        }
    }
}

/// Tiered cache: read-through, write-through, promote on read
pub struct TieredCache {
    /// Fastest first
    tiers: Vec<Arc<dyn CacheProvider>>,
    promotion: PromotionMode,
    /// Aggregate counters: one hit or miss per manager-level `get`
    stats: Arc<StatsTracker>,
}

impl TieredCache {
    /// Build from an ordered, non-empty tier list
    pub fn new(tiers: Vec<Arc<dyn CacheProvider>>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::Config(
                "tiered cache requires at least one tier".to_string(),
            ));
        }

        let kinds: Vec<String> = tiers.iter().map(|t| t.kind().to_string()).collect();
        info!(tiers = %kinds.join(" -> "), "created tiered cache");

        Ok(Self {
            tiers,
            promotion: PromotionMode::default(),
            stats: Arc::new(StatsTracker::new()),
        })
    }

    /// Set the promotion policy
    pub fn with_promotion(mut self, promotion: PromotionMode) -> Self {
        self.promotion = promotion;
        self
    }

    /// Promotion policy in effect
    pub fn promotion(&self) -> PromotionMode {
        self.promotion
    }

    /// All tiers, fastest first
    pub fn tiers(&self) -> &[Arc<dyn CacheProvider>] {
        &self.tiers
    }

    /// Tier at `index` (0 = fastest)
    pub fn tier(&self, index: usize) -> Option<&Arc<dyn CacheProvider>> {
        self.tiers.get(index)
    }

    fn schedule_promotion(&self, hit_index: usize, key: &str, entry: &CacheEntry) {
        let faster = &self.tiers[..hit_index];

        if self.promotion == PromotionMode::Background {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let tiers = faster.to_vec();
                let stats = Arc::clone(&self.stats);
                let key = key.to_string();
                let entry = entry.clone();
                handle.spawn_blocking(move || promote(&tiers, &stats, &key, &entry));
                return;
            }
            trace!(key, "no runtime available, promoting synchronously");
        }

        promote(faster, &self.stats, key, entry);
    }
}

impl CacheProvider for TieredCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Tiered
    }

    fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Some(entry) = tier.get_entry(key) {
                self.stats.record_hit();
                if index > 0 {
                    debug!(key, tier = index, "hit in slower tier, promoting");
                    self.schedule_promotion(index, key, &entry);
                }
                return Some(entry);
            }
        }

        self.stats.record_miss();
        None
    }

    fn set(&self, key: &str, value: Bytes, ttl: Expiry) -> Result<()> {
        let mut failures = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            if let Err(e) = tier.set(key, value.clone(), ttl) {
                failures.push(describe(index, tier.as_ref(), &e));
            }
        }

        if failures.len() == self.tiers.len() {
            return Err(Error::AllTiersFailed { failures });
        }
        if !failures.is_empty() {
            warn!(key, "write-through partially failed: {}", failures.join("; "));
        }

        self.stats.record_set();
        Ok(())
    }

    /// Offer the copy to every tier; used when this cache is itself a tier
    fn promote(&self, key: &str, entry: &CacheEntry) -> Result<bool> {
        let mut stored = false;
        let mut failures = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.promote(key, entry) {
                Ok(copied) => stored |= copied,
                Err(e) => failures.push(describe(index, tier.as_ref(), &e)),
            }
        }

        if failures.len() == self.tiers.len() {
            return Err(Error::AllTiersFailed { failures });
        }
        if !failures.is_empty() {
            warn!(key, "promotion partially failed: {}", failures.join("; "));
        }
        Ok(stored)
    }

    fn remove(&self, key: &str) -> bool {
        // Every tier must be visited, so no short-circuit
        self.tiers
            .iter()
            .fold(false, |removed, tier| tier.remove(key) | removed)
    }

    fn clear(&self) -> Result<()> {
        let failures: Vec<String> = self
            .tiers
            .iter()
            .enumerate()
            .filter_map(|(index, tier)| {
                tier.clear()
                    .err()
                    .map(|e| describe(index, tier.as_ref(), &e))
            })
            .collect();

        if failures.is_empty() {
            info!(tiers = self.tiers.len(), "cleared tiered cache");
            Ok(())
        } else {
            warn!("clear failed on {} tier(s)", failures.len());
            Err(Error::ClearFailed { failures })
        }
    }

    fn purge_expired(&self) -> usize {
        self.tiers.iter().map(|tier| tier.purge_expired()).sum()
    }

    /// Union of every tier's entries; the newest copy of a key wins
    fn entries(&self) -> Result<Vec<(String, CacheEntry)>> {
        let mut merged: BTreeMap<String, CacheEntry> = BTreeMap::new();
        let mut failures = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            let entries = match tier.entries() {
                Ok(entries) => entries,
                Err(e) => {
                    failures.push(describe(index, tier.as_ref(), &e));
                    continue;
                }
            };
            for (key, entry) in entries {
                match merged.get(&key) {
                    Some(seen) if seen.created_at_ms() >= entry.created_at_ms() => {}
                    _ => {
                        merged.insert(key, entry);
                    }
                }
            }
        }

        if failures.len() == self.tiers.len() {
            return Err(Error::AllTiersFailed { failures });
        }
        if !failures.is_empty() {
            warn!("listing entries partially failed: {}", failures.join("; "));
        }
        Ok(merged.into_iter().collect())
    }

    fn stats(&self) -> CacheStats {
        let tiers: Vec<CacheStats> = self.tiers.iter().map(|tier| tier.stats()).collect();

        // Tiers hold overlapping copies; the largest tier bounds the distinct count
        let size = tiers.iter().map(|t| t.size).max().unwrap_or(0);
        let mut stats = self.stats.snapshot(CacheKind::Tiered, size);
        stats.evictions = tiers.iter().map(|t| t.evictions).sum();
        stats.expirations = tiers.iter().map(|t| t.expirations).sum();
        stats.tiers = tiers;
        stats
    }

    fn close(&self) -> Result<()> {
        let mut first_error = None;
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Err(e) = tier.close() {
                warn!("close failed: {}", describe(index, tier.as_ref(), &e));
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<CacheKind> = self.tiers.iter().map(|t| t.kind()).collect();
        f.debug_struct("TieredCache")
            .field("tiers", &kinds)
            .field("promotion", &self.promotion)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
