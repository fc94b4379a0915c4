//! Cache Factory
//!
//! Builds a single tier or a tiered stack from a declarative
//! [`CacheConfig`]. All validation happens here, before any tier opens a
//! file or connection.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::config::{CacheConfig, CacheKind};
use super::file::FileCache;
use super::manager::TieredCache;
use super::memory::MemoryCache;
use super::provider::CacheProvider;
use super::sqlite::SqliteCache;
use crate::error::{Error, Result};

/// Constructs caches from configuration
pub struct CacheFactory;

impl CacheFactory {
    /// Create the cache described by `config`
    pub fn create(config: &CacheConfig) -> Result<Arc<dyn CacheProvider>> {
        config.validate()?;
        let cache = Self::build_tier(config)?;

        info!(kind = %config.kind, "cache created");
        Ok(cache)
    }

    /// Create a tiered cache, keeping the concrete type
    pub fn create_tiered(config: &CacheConfig) -> Result<TieredCache> {
        config.validate()?;
        if config.kind != CacheKind::Tiered {
            return Err(Error::Config(format!(
                "expected a tiered config, got {}",
                config.kind
            )));
        }
        Self::build_tiered(config)
    }

    /// The default `[memory, sqlite]` stack rooted at `base_dir`
    pub fn create_default(base_dir: impl AsRef<Path>) -> Result<Arc<dyn CacheProvider>> {
        Self::create(&CacheConfig::default_tiered(base_dir))
    }

    fn build_tier(config: &CacheConfig) -> Result<Arc<dyn CacheProvider>> {
        Ok(match config.kind {
            CacheKind::Memory => Arc::new(MemoryCache::from_config(config)?),
            CacheKind::File => Arc::new(FileCache::from_config(config)?),
            CacheKind::Sqlite => Arc::new(SqliteCache::from_config(config)?),
            CacheKind::Tiered => Arc::new(Self::build_tiered(config)?),
        })
    }

    fn build_tiered(config: &CacheConfig) -> Result<TieredCache> {
        let mut tiers: Vec<Arc<dyn CacheProvider>> = Vec::with_capacity(config.tiers.len());

        for (index, tier_config) in config.tiers.iter().enumerate() {
            match Self::build_tier(tier_config) {
                Ok(tier) => tiers.push(tier),
                Err(e) => {
                    // Release whatever was already opened
                    for opened in &tiers {
                        if let Err(close_err) = opened.close() {
                            warn!("cannot close {} tier: {}", opened.kind(), close_err);
                        }
                    }
                    let reason = match e {
                        Error::Config(reason) => reason,
                        other => other.to_string(),
                    };
                    return Err(Error::Config(format!("tier {}: {}", index, reason)));
                }
            }
        }

        Ok(TieredCache::new(tiers)?.with_promotion(config.promotion))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::policy::{Expiry, PromotionMode};
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[test]
    fn test_create_each_kind() {
        let dir = TempDir::new().unwrap();

        let memory = CacheFactory::create(&CacheConfig::memory(Some(10))).unwrap();
        assert_eq!(memory.kind(), CacheKind::Memory);
        assert_eq!(memory.stats().max_entries, Some(10));

        let file = CacheFactory::create(&CacheConfig::file(dir.path().join("files"))).unwrap();
        assert_eq!(file.kind(), CacheKind::File);

        let sqlite =
            CacheFactory::create(&CacheConfig::sqlite(dir.path().join("cache.db"))).unwrap();
        assert_eq!(sqlite.kind(), CacheKind::Sqlite);
    }

    #[test]
    fn test_create_tiered_preserves_order_and_promotion() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::tiered(vec![
            CacheConfig::memory(Some(5)),
            CacheConfig::file(dir.path().join("files")),
            CacheConfig::sqlite(dir.path().join("cache.db")),
        ])
        .with_promotion(PromotionMode::Background);

        let tiered = CacheFactory::create_tiered(&config).unwrap();
        let kinds: Vec<CacheKind> = tiered.tiers().iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![CacheKind::Memory, CacheKind::File, CacheKind::Sqlite]);
        assert_eq!(tiered.promotion(), PromotionMode::Background);
    }

    #[test]
    fn test_invalid_configs_fail_eagerly() {
        assert_matches!(
            CacheFactory::create(&CacheConfig::memory(Some(0))).err(),
            Some(Error::Config(_))
        );
        assert_matches!(
            CacheFactory::create(&CacheConfig::tiered(Vec::new())).err(),
            Some(Error::Config(_))
        );
        assert_matches!(
            CacheFactory::create(&CacheConfig::tiered(vec![CacheConfig::tiered(vec![
                CacheConfig::memory(Some(0))
            ])]))
            .err(),
            Some(Error::Config(_))
        );
        assert_matches!(
            CacheFactory::create_tiered(&CacheConfig::memory(None)),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_nested_tiered_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::tiered(vec![
            CacheConfig::tiered(vec![
                CacheConfig::memory(Some(5)),
                CacheConfig::file(dir.path().join("files")),
            ]),
            CacheConfig::sqlite(dir.path().join("cache.db")),
        ]);

        let tiered = CacheFactory::create_tiered(&config).unwrap();
        let kinds: Vec<CacheKind> = tiered.tiers().iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![CacheKind::Tiered, CacheKind::Sqlite]);

        tiered
            .set("report", Bytes::from_static(b"{}"), Expiry::Default)
            .unwrap();
        let stats = tiered.stats();
        assert_eq!(stats.tiers[0].tiers.len(), 2);
        assert_eq!(stats.tiers[0].tiers[1].size, 1);
        assert_eq!(stats.tiers[1].size, 1);
        assert_eq!(tiered.get("report").unwrap().as_ref(), b"{}");
    }

    #[test]
    fn test_nested_tier_failure_closes_opened_tiers() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let config = CacheConfig::tiered(vec![
            CacheConfig::memory(None),
            CacheConfig::tiered(vec![
                CacheConfig::file(dir.path().join("files")),
                CacheConfig::sqlite(blocker.join("cache.db")),
            ]),
        ]);
        let err = CacheFactory::create(&config).err().unwrap();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("tier 1: tier 1"));
    }

    #[test]
    fn test_unopenable_sub_tier_names_its_index() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let config = CacheConfig::tiered(vec![
            CacheConfig::memory(None),
            CacheConfig::sqlite(blocker.join("cache.db")),
        ]);
        let err = CacheFactory::create(&config).err().unwrap();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("tier 1"));
    }

    #[test]
    fn test_default_stack_persists_across_restart() {
        let dir = TempDir::new().unwrap();

        let cache = CacheFactory::create_default(dir.path()).unwrap();
        assert_eq!(cache.kind(), CacheKind::Tiered);
        cache
            .set("report", Bytes::from_static(b"{\"ok\":true}"), Expiry::Default)
            .unwrap();
        cache.close().unwrap();

        let reopened = CacheFactory::create_default(dir.path()).unwrap();
        assert_eq!(reopened.get("report").unwrap().as_ref(), b"{\"ok\":true}");
        let stats = reopened.stats();
        assert_eq!(stats.tiers.len(), 2);
        assert_eq!(stats.tiers[1].default_ttl_seconds, Some(86_400));
    }
}
