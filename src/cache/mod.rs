//! Multi-Tier Analysis Result Cache
//!
//! Memoizes expensive analysis results across a latency-ordered stack of
//! tiers, all behind one [`CacheProvider`] interface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                     Cache Manager (TieredCache)                           │
//! │          read-through · write-through · promote on slower-tier hit        │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Memory Tier          │ File Tier            │ Indexed Store Tier          │
//! │  ┌────────────────┐   │ ┌────────────────┐   │ ┌──────────────────────┐   │
//! │  │ HashMap + LRU  │   │ │ sha256(key)    │   │ │ SQLite               │   │
//! │  │ recency index  │   │ │ one file/entry │   │ │ cache_entries table  │   │
//! │  │ TTL, capacity  │   │ │ atomic rename  │   │ │ WAL, busy_timeout    │   │
//! │  └────────────────┘   │ └────────────────┘   │ └──────────────────────┘   │
//! │      volatile         │   persistent         │      persistent            │
//! └──────────────────────────────────────────────────────────────────────────┘
//!                  ▲
//!                  │ CacheFactory::create(&CacheConfig)
//! ```
//!
//! # Guarantees
//!
//! - Expired entries are never returned, whether or not they were swept
//! - Corrupt persistent entries are deleted on detection and read as misses
//! - Read faults never surface; writes fail with a typed, ignorable error
//! - Lock waits are bounded by the configured lock timeout
//! - A promoted copy expires no later than the entry it was copied from

mod config;
mod entry;
mod factory;
mod file;
mod manager;
mod memory;
mod metrics;
mod policy;
mod provider;
mod sqlite;
mod sweeper;
mod warmup;

pub use config::{
    CacheConfig, CacheKind, DEFAULT_DIR_NAME, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_ENTRIES,
    DEFAULT_TTL_SECONDS, IN_MEMORY_DB_PATH,
};
pub use entry::{fx_hash, now_millis, CacheEntry};
pub use factory::CacheFactory;
pub use file::{key_filename, FileCache};
pub use manager::TieredCache;
pub use memory::MemoryCache;
pub use metrics::{CacheStats, Counters, StatsTracker};
pub use policy::{Expiry, PromotionMode};
pub use provider::{CacheProvider, CacheProviderExt};
pub use sqlite::SqliteCache;
pub use sweeper::{spawn_sweeper, SweeperHandle};
pub use warmup::{default_warmup, load_warmup_file, warmup_items};

// =============================================================================
// Tests
// =============================================================================
