//! Cache Entry Types
//!
//! Timestamps, TTL bookkeeping and integrity hashing shared by every tier.

use std::time::Duration;

use bytes::Bytes;

/// Current wall-clock time as unix epoch milliseconds
#[inline]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fast non-cryptographic hash (FxHash algorithm), used as a payload checksum
#[inline]
pub fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Convert a TTL to whole milliseconds, saturating on overflow
#[inline]
pub fn ttl_to_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// True when an entry created at `created_at_ms` with `ttl_ms` is past its TTL
#[inline]
pub fn is_expired_at(created_at_ms: i64, ttl_ms: Option<u64>, now_ms: i64) -> bool {
    match ttl_ms {
        None => false,
        Some(ttl) => {
            let deadline = created_at_ms.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX));
            now_ms > deadline
        }
    }
}

/// True when a promoted copy created at `incoming_created_ms` may replace
/// the stored entry
///
/// A stored entry is kept while it is live and at least as new as the copy.
#[inline]
pub fn promotion_replaces(
    incoming_created_ms: i64,
    stored_created_ms: i64,
    stored_ttl_ms: Option<u64>,
    now_ms: i64,
) -> bool {
    incoming_created_ms > stored_created_ms
        || is_expired_at(stored_created_ms, stored_ttl_ms, now_ms)
}

/// Validate a caller-supplied key
///
/// Keys are opaque but must be non-empty.
#[inline]
pub fn valid_key(key: &str) -> bool {
    !key.is_empty()
}

/// A single cached value with its lifecycle metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    value: Bytes,
    created_at_ms: i64,
    ttl_ms: Option<u64>,
    last_accessed_ms: i64,
}

impl CacheEntry {
    /// Create an entry stamped with the current time
    pub fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self::with_timestamps(value, now_millis(), ttl.map(ttl_to_millis))
    }

    /// Create an entry with an explicit creation time (restores from disk)
    pub fn with_timestamps(value: Bytes, created_at_ms: i64, ttl_ms: Option<u64>) -> Self {
        Self {
            value,
            created_at_ms,
            ttl_ms,
            last_accessed_ms: created_at_ms,
        }
    }

    /// Get the payload (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Consume the entry, returning the payload
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }

    #[inline]
    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    #[inline]
    pub fn ttl_ms(&self) -> Option<u64> {
        self.ttl_ms
    }

    #[inline]
    pub fn last_accessed_ms(&self) -> i64 {
        self.last_accessed_ms
    }

    /// Record an access at the current time
    #[inline]
    pub fn touch(&mut self) {
        self.last_accessed_ms = now_millis();
    }

    /// Check if the entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Check expiry against a fixed clock reading
    #[inline]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        is_expired_at(self.created_at_ms, self.ttl_ms, now_ms)
    }

    /// Copy for a faster tier, expiring no later than `max_ttl` past `now_ms`
    ///
    /// The creation time is kept, so the copy never outlives this entry.
    pub fn promoted_copy(&self, max_ttl: Option<Duration>, now_ms: i64) -> CacheEntry {
        let ttl_ms = match max_ttl.map(ttl_to_millis) {
            None => self.ttl_ms,
            Some(limit) => {
                let age = u64::try_from(now_ms.saturating_sub(self.created_at_ms)).unwrap_or(0);
                let capped = age.saturating_add(limit);
                Some(self.ttl_ms.map_or(capped, |ttl| ttl.min(capped)))
            }
        };
        Self::with_timestamps(self.value.clone(), self.created_at_ms, ttl_ms)
    }

    /// Payload checksum
    #[inline]
    pub fn checksum(&self) -> u64 {
        fx_hash(&self.value)
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.value.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
