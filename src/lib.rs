//! Analysis Cache - Multi-Tier Result Cache for File and Repository Analysis
//!
//! Sits beneath an analysis pipeline and memoizes expensive results (AI
//! provider responses, parsed file reports) keyed by caller-chosen strings,
//! typically `"{path}:{content_hash}"`.
//!
//! # Architecture
//!
//! ```text
//! caller → TieredCache → [memory] → [file | sqlite]
//!                 ▲
//!           CacheFactory ← CacheConfig (YAML / JSON)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, tiered combinator, factory and sweeper
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    spawn_sweeper, CacheConfig, CacheEntry, CacheFactory, CacheKind, CacheProvider,
    CacheProviderExt, CacheStats, Expiry, FileCache, MemoryCache, PromotionMode, SqliteCache,
    SweeperHandle, TieredCache,
};
pub use error::{Error, Result};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
