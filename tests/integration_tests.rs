//! Analysis Cache Integration Tests
//!
//! Exercises the public API end to end:
//! - Tier invariants (capacity, TTL, replace, round trip)
//! - Tiered behavior (promotion, write-through, restart)
//! - Persistent-tier self-healing
//! - Configuration loading and the background sweeper

use std::sync::Arc;
use std::time::Duration;

use analysis_cache::cache::{key_filename, warmup_items};
use analysis_cache::{
    spawn_sweeper, CacheConfig, CacheFactory, CacheKind, CacheProvider, CacheProviderExt,
    Expiry, FileCache, MemoryCache, PromotionMode, SqliteCache, TieredCache,
};
use bytes::Bytes;
use serde_json::json;
use tempfile::TempDir;

fn val(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// One instance of every single-tier kind, with a shared temp root
fn every_tier(dir: &TempDir) -> Vec<Arc<dyn CacheProvider>> {
    vec![
        Arc::new(MemoryCache::new(Some(100), None).unwrap()) as Arc<dyn CacheProvider>,
        Arc::new(FileCache::new(dir.path().join("files"), None).unwrap()),
        Arc::new(SqliteCache::new(dir.path().join("cache.db"), None).unwrap()),
    ]
}

// =============================================================================
// Tier Invariants
// =============================================================================

mod tier_tests {
    use super::*;

    #[test]
    fn test_capacity_evicts_least_recently_accessed() {
        let cache = MemoryCache::new(Some(3), None).unwrap();
        for key in ["a", "b", "c"] {
            cache.set(key, val(key), Expiry::Default).unwrap();
        }
        // Refresh "a" so "b" becomes the oldest
        cache.get("a");
        cache.set("d", val("d"), Expiry::Default).unwrap();

        assert_eq!(cache.len(), 3);
        assert!(cache.get("b").is_none());
        for key in ["a", "c", "d"] {
            assert_eq!(cache.get(key).unwrap(), val(key));
        }
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_two_entry_scenario() {
        let cache = CacheFactory::create(&CacheConfig::memory(Some(2))).unwrap();
        cache.set("a", val("1"), Expiry::Default).unwrap();
        cache.set("b", val("2"), Expiry::Default).unwrap();
        cache.set("c", val("3"), Expiry::Default).unwrap();

        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").unwrap(), val("2"));
        assert_eq!(cache.get("c").unwrap(), val("3"));
    }

    #[test]
    fn test_ttl_boundary_for_every_tier() {
        let dir = TempDir::new().unwrap();
        let tiers = every_tier(&dir);

        for tier in &tiers {
            tier.set("k", val("v"), Expiry::seconds(1)).unwrap();
        }
        std::thread::sleep(Duration::from_millis(500));
        for tier in &tiers {
            assert_eq!(tier.get("k").unwrap(), val("v"), "{} before TTL", tier.kind());
        }

        std::thread::sleep(Duration::from_millis(700));
        for tier in &tiers {
            assert!(tier.get("k").is_none(), "{} after TTL", tier.kind());
        }
    }

    #[test]
    fn test_idempotent_replace_for_every_tier() {
        let dir = TempDir::new().unwrap();
        for tier in every_tier(&dir) {
            tier.set("k", val("v1"), Expiry::Default).unwrap();
            tier.set("k", val("v2"), Expiry::Default).unwrap();

            assert_eq!(tier.get("k").unwrap(), val("v2"));
            assert_eq!(tier.stats().sets, 2, "{}", tier.kind());
            assert_eq!(tier.stats().size, 1, "{}", tier.kind());
        }
    }

    #[test]
    fn test_round_trip_is_byte_exact_for_every_tier() {
        let dir = TempDir::new().unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        for tier in every_tier(&dir) {
            tier.set("blob", Bytes::from(payload.clone()), Expiry::Never)
                .unwrap();
            assert_eq!(tier.get("blob").unwrap().as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn test_json_values_through_every_tier() {
        let dir = TempDir::new().unwrap();
        let report = serde_json::json!({
            "file_type": "code",
            "language": "rust",
            "summary": "cache tier",
            "line_count": 412,
        });

        for tier in every_tier(&dir) {
            tier.set_json("lib.rs:9f2c", &report, Expiry::Default).unwrap();
            let restored: serde_json::Value = tier.get_json("lib.rs:9f2c").unwrap();
            assert_eq!(restored, report);
        }
    }
}

// =============================================================================
// Tiered Behavior
// =============================================================================

mod tiered_tests {
    use super::*;

    fn memory_over_sqlite(db: &std::path::Path) -> (Arc<MemoryCache>, Arc<SqliteCache>, TieredCache) {
        let memory = Arc::new(MemoryCache::new(Some(100), None).unwrap());
        let sqlite = Arc::new(SqliteCache::new(db, None).unwrap());
        let tiered = TieredCache::new(vec![
            memory.clone() as Arc<dyn CacheProvider>,
            sqlite.clone() as Arc<dyn CacheProvider>,
        ])
        .unwrap();
        (memory, sqlite, tiered)
    }

    #[test]
    fn test_promotion_from_sqlite_into_memory() {
        let dir = TempDir::new().unwrap();
        let (memory, sqlite, tiered) = memory_over_sqlite(&dir.path().join("cache.db"));

        sqlite.set("k", val("v"), Expiry::Default).unwrap();
        assert_eq!(tiered.get("k").unwrap(), val("v"));
        assert_eq!(memory.get("k").unwrap(), val("v"));
        assert_eq!(tiered.stats().promotions, 1);
    }

    #[test]
    fn test_ttl_holds_after_eviction_and_promotion() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryCache::new(Some(1), None).unwrap());
        let sqlite = Arc::new(SqliteCache::new(dir.path().join("cache.db"), None).unwrap());
        let tiered = TieredCache::new(vec![
            memory.clone() as Arc<dyn CacheProvider>,
            sqlite.clone() as Arc<dyn CacheProvider>,
        ])
        .unwrap();

        tiered
            .set("k", val("v"), Expiry::After(Duration::from_millis(300)))
            .unwrap();
        // Capacity one: this pushes "k" out of memory
        tiered.set("other", val("o"), Expiry::Never).unwrap();
        assert!(!memory.contains("k"));

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(tiered.get("k").unwrap(), val("v"));
        assert!(memory.contains("k"));

        std::thread::sleep(Duration::from_millis(300));
        assert!(tiered.get("k").is_none());
        assert!(memory.get("k").is_none());
        assert!(sqlite.get("k").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_background_promotion_never_restores_overwritten_value() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryCache::new(Some(1000), None).unwrap());
        let sqlite = Arc::new(SqliteCache::new(dir.path().join("cache.db"), None).unwrap());
        let tiered = TieredCache::new(vec![
            memory.clone() as Arc<dyn CacheProvider>,
            sqlite.clone() as Arc<dyn CacheProvider>,
        ])
        .unwrap()
        .with_promotion(PromotionMode::Background);

        let keys: Vec<String> = (0..50).map(|i| format!("report-{}", i)).collect();
        for key in &keys {
            sqlite.set(key, val("old"), Expiry::Default).unwrap();
            // Queues a promotion of "old" that may land after the write below
            assert_eq!(tiered.get(key).unwrap(), val("old"));
            tiered.set(key, val("new"), Expiry::Default).unwrap();
            assert_eq!(tiered.get(key).unwrap(), val("new"), "{}", key);
        }

        // Let every queued promotion finish
        tokio::time::sleep(Duration::from_millis(200)).await;
        for key in &keys {
            assert_eq!(memory.get(key).unwrap(), val("new"), "{}", key);
            assert_eq!(tiered.get(key).unwrap(), val("new"), "{}", key);
        }
    }

    #[test]
    fn test_nested_tiered_from_config() {
        let dir = TempDir::new().unwrap();
        let json = format!(
            r#"{{
                "kind": "tiered",
                "tiers": [
                    {{"kind": "tiered", "tiers": [
                        {{"kind": "memory", "max_entries": 10}},
                        {{"kind": "file", "directory": "{}"}}
                    ]}},
                    {{"kind": "sqlite", "db_path": "{}"}}
                ]
            }}"#,
            dir.path().join("files").display(),
            dir.path().join("cache.db").display()
        );
        let config = CacheConfig::from_json_str(&json).unwrap();

        let cache = CacheFactory::create(&config).unwrap();
        cache.set("x", val("hello"), Expiry::Default).unwrap();
        cache.close().unwrap();

        // Only the sqlite tier and the file tier survive a restart
        let cache = CacheFactory::create(&config).unwrap();
        assert_eq!(cache.get("x").unwrap(), val("hello"));
        let stats = cache.stats();
        assert_eq!(stats.tiers[0].kind, CacheKind::Tiered);
        assert_eq!(stats.tiers[0].tiers[1].size, 1);
        assert_eq!(stats.tiers[1].sets, 1);
    }

    #[test]
    fn test_write_through_reaches_every_tier() {
        let dir = TempDir::new().unwrap();
        let tiers = every_tier(&dir);
        let tiered = TieredCache::new(tiers.clone()).unwrap();

        tiered.set("k", val("v"), Expiry::Default).unwrap();
        for tier in &tiers {
            assert_eq!(tier.get("k").unwrap(), val("v"), "{}", tier.kind());
        }
    }

    #[test]
    fn test_restart_without_memory_tier() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("cache.db");

        let (_memory, sqlite, tiered) = memory_over_sqlite(&db);
        tiered.set("x", val("hello"), Expiry::Default).unwrap();
        sqlite.close().unwrap();
        drop(tiered);

        let reopened = SqliteCache::new(&db, None).unwrap();
        assert_eq!(reopened.get("x").unwrap(), val("hello"));
    }

    #[test]
    fn test_restart_through_factory_config() {
        let dir = TempDir::new().unwrap();
        let yaml = format!(
            r#"
kind: tiered
promotion: synchronous
tiers:
  - kind: memory
    max_entries: 100
  - kind: sqlite
    db_path: {}
    default_ttl_seconds: 3600
"#,
            dir.path().join("cache.db").display()
        );
        let config = CacheConfig::from_yaml_str(&yaml).unwrap();

        let cache = CacheFactory::create(&config).unwrap();
        cache.set("x", val("hello"), Expiry::Default).unwrap();
        cache.close().unwrap();

        let cache = CacheFactory::create(&config).unwrap();
        assert_eq!(cache.get("x").unwrap(), val("hello"));

        let stats = cache.stats();
        assert_eq!(stats.kind, CacheKind::Tiered);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.tiers[0].size, 1);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let dir = TempDir::new().unwrap();
        let tiered: Arc<dyn CacheProvider> = Arc::new(
            TieredCache::new(every_tier(&dir)).unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&tiered);
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let key = format!("worker{}:{}", t, i);
                        cache.set(&key, val(&key), Expiry::Default).unwrap();
                        assert_eq!(cache.get(&key).unwrap(), val(&key));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = tiered.stats();
        assert_eq!(stats.sets, 80);
        assert_eq!(stats.hits, 80);
        assert!(stats.tiers.iter().all(|t| t.size == 80));
    }
}

// =============================================================================
// Self-Healing
// =============================================================================

mod corruption_tests {
    use super::*;

    #[test]
    fn test_corrupt_file_is_deleted_and_reported_as_miss() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path(), None).unwrap();
        cache.set("report", val("{\"ok\":true}"), Expiry::Default).unwrap();

        let path = dir.path().join(key_filename("report"));
        assert!(path.exists());
        std::fs::write(&path, b"\x00garbage that is not an entry").unwrap();

        assert!(cache.get("report").is_none());
        assert!(!path.exists());

        // The key is usable again afterwards
        cache.set("report", val("fresh"), Expiry::Default).unwrap();
        assert_eq!(cache.get("report").unwrap(), val("fresh"));
    }

    #[test]
    fn test_tiered_read_falls_through_corrupt_file_tier() {
        let dir = TempDir::new().unwrap();
        let file = Arc::new(FileCache::new(dir.path().join("files"), None).unwrap());
        let sqlite = Arc::new(SqliteCache::new(dir.path().join("cache.db"), None).unwrap());
        let tiered = TieredCache::new(vec![
            file.clone() as Arc<dyn CacheProvider>,
            sqlite.clone() as Arc<dyn CacheProvider>,
        ])
        .unwrap();

        tiered.set("k", val("v"), Expiry::Default).unwrap();
        std::fs::write(file.path_for("k"), b"broken").unwrap();

        // Sqlite answers, and promotion rewrites a healthy file
        assert_eq!(tiered.get("k").unwrap(), val("v"));
        assert_eq!(file.get("k").unwrap(), val("v"));
    }
}

// =============================================================================
// Maintenance
// =============================================================================

mod maintenance_tests {
    use super::*;

    #[test]
    fn test_purge_and_stats_across_tiers() {
        let dir = TempDir::new().unwrap();
        let tiered = TieredCache::new(every_tier(&dir)).unwrap();

        tiered
            .set("short", val("v"), Expiry::After(Duration::from_millis(20)))
            .unwrap();
        tiered.set("long", val("v"), Expiry::Never).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(tiered.stats().tiers[2].pending_expired, Some(1));
        assert_eq!(tiered.purge_expired(), 3);

        let stats = tiered.stats();
        assert!(stats.tiers.iter().all(|t| t.size == 1));
        assert_eq!(stats.expirations, 3);
    }

    #[test]
    fn test_clear_and_invalidate() {
        let dir = TempDir::new().unwrap();
        let cache = CacheFactory::create_default(dir.path()).unwrap();

        let stored = cache
            .pre_warm(vec![
                ("python_script".to_string(), val("{}")),
                ("markdown_doc".to_string(), val("{}")),
                ("config_file".to_string(), val("{}")),
            ])
            .unwrap();
        assert_eq!(stored, 3);

        assert_eq!(cache.invalidate(&["python_script", "absent"]), 1);
        assert!(cache.get("python_script").is_none());

        cache.clear().unwrap();
        assert!(cache.get("markdown_doc").is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_pre_warm_with_built_in_entries_and_listing() {
        let dir = TempDir::new().unwrap();
        let cache = CacheFactory::create_default(dir.path()).unwrap();

        let mut extra = serde_json::Map::new();
        extra.insert("rust_crate".to_string(), json!({"file_type": "code"}));
        assert_eq!(cache.pre_warm(warmup_items(Some(extra))).unwrap(), 6);

        let python: serde_json::Value = cache.get_json("python_script").unwrap();
        assert_eq!(python["language"], "python");
        assert_eq!(python["confidence"], 0.95);

        let entries = cache.entries().unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "javascript_module",
                "json_config",
                "markdown_doc",
                "python_script",
                "rust_crate",
                "text_file"
            ]
        );
    }

    #[test]
    fn test_counters_persist_across_restart() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::tiered(vec![
            CacheConfig::file(dir.path().join("files")),
            CacheConfig::sqlite(dir.path().join("cache.db")),
        ]);

        let cache = CacheFactory::create(&config).unwrap();
        cache.set("a", val("1"), Expiry::Default).unwrap();
        cache.get("a");
        cache.get("missing");
        cache.close().unwrap();

        let stats = CacheFactory::create(&config).unwrap().stats();
        for tier in &stats.tiers {
            assert_eq!(tier.sets, 1, "{}", tier.kind);
        }
        assert_eq!(stats.tiers[0].hits, 1);
        assert_eq!(stats.tiers[1].misses, 1);
        // Manager-level counters start over
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_sweeper_reclaims_disk_entries() {
        let dir = TempDir::new().unwrap();
        let file = Arc::new(FileCache::new(dir.path(), None).unwrap());
        for i in 0..5 {
            file.set(
                &format!("k{}", i),
                val("v"),
                Expiry::After(Duration::from_millis(10)),
            )
            .unwrap();
        }

        let sweeper = spawn_sweeper(file.clone(), Duration::from_millis(25));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sweeper.shutdown().await, 5);
        assert_eq!(file.stats().size, 0);
    }
}
