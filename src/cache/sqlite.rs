//! Persistent Indexed Store Tier
//!
//! Single SQLite database holding every entry in one table. Survives
//! restarts, keeps many small entries cheaply and answers stats, clear and
//! expiration sweeps with single statements.
//!
//! # Concurrency
//!
//! One connection per instance, serialized behind a mutex. Cross-process
//! writers are arbitrated by SQLite's own locking (WAL journal,
//! `busy_timeout` equal to the tier lock timeout). Concurrent writes to the
//! same key resolve as last write wins.
//!
//! # Statistics
//!
//! Counters live in a `cache_stats` table and are added to, never
//! overwritten, so several processes sharing one database accumulate into
//! the same totals. Increments are written after each write operation and
//! on sweep, close and drop; lookups alone never write.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheKind, DEFAULT_LOCK_TIMEOUT_MS, IN_MEMORY_DB_PATH};
use super::entry::{now_millis, ttl_to_millis, valid_key, CacheEntry};
use super::metrics::{CacheStats, Counters, StatsTracker, COUNTER_NAMES};
use super::policy::Expiry;
use super::provider::CacheProvider;
use crate::error::{Error, Result};

const TIER: &str = "sqlite";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY NOT NULL,
        value BLOB NOT NULL,
        created_at INTEGER NOT NULL,
        ttl_ms INTEGER
    );

    CREATE TABLE IF NOT EXISTS cache_stats (
        name TEXT PRIMARY KEY NOT NULL,
        value INTEGER NOT NULL DEFAULT 0
    );
";

const SELECT_ROW: &str = "SELECT value, created_at, ttl_ms FROM cache_entries WHERE key = ?1";

/// Conditional copy: replaces only an older or expired row
const PROMOTE_ROW: &str = "
    INSERT INTO cache_entries (key, value, created_at, ttl_ms)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        created_at = excluded.created_at,
        ttl_ms = excluded.ttl_ms
    WHERE excluded.created_at > cache_entries.created_at
       OR (cache_entries.ttl_ms IS NOT NULL
           AND cache_entries.created_at + cache_entries.ttl_ms < ?5)
";

/// Deletes a row only while it is still expired
const DELETE_EXPIRED_ROW: &str = "
    DELETE FROM cache_entries
    WHERE key = ?1 AND ttl_ms IS NOT NULL AND created_at + ttl_ms < ?2
";

fn ttl_column(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| i64::try_from(ttl_to_millis(ttl)).unwrap_or(i64::MAX))
}

fn ttl_ms_column(ttl_ms: Option<u64>) -> Option<i64> {
    ttl_ms.map(|ttl| i64::try_from(ttl).unwrap_or(i64::MAX))
}

type RawRow = (Vec<u8>, i64, Option<i64>);

fn read_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<RawRow> {
    Ok((row.get(offset)?, row.get(offset + 1)?, row.get(offset + 2)?))
}

fn row_entry((value, created_at, ttl_ms): RawRow) -> CacheEntry {
    CacheEntry::with_timestamps(
        Bytes::from(value),
        created_at,
        ttl_ms.map(|ttl| ttl.max(0) as u64),
    )
}

fn is_corrupt_row(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::FromSqlConversionFailure(..)
    )
}

/// SQLite-backed persistent tier
pub struct SqliteCache {
    /// `None` once closed
    conn: Mutex<Option<Connection>>,
    db_path: PathBuf,
    default_ttl: Option<Duration>,
    lock_timeout: Duration,
    stats: StatsTracker,
}

impl SqliteCache {
    /// Open (creating if needed) the database at `db_path`
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn new(db_path: impl Into<PathBuf>, default_ttl: Option<Duration>) -> Result<Self> {
        Self::with_lock_timeout(
            db_path,
            default_ttl,
            Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        )
    }

    /// Open with an explicit bound on lock waits
    pub fn with_lock_timeout(
        db_path: impl Into<PathBuf>,
        default_ttl: Option<Duration>,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if default_ttl == Some(Duration::ZERO) {
            return Err(Error::Config(
                "sqlite tier: default TTL must be greater than zero".to_string(),
            ));
        }

        let conn = Self::open_connection(&db_path, lock_timeout).map_err(|e| {
            Error::Config(format!(
                "sqlite tier: cannot open {}: {}",
                db_path.display(),
                e
            ))
        })?;

        let stats = StatsTracker::new();
        match Self::load_counters(&conn) {
            Ok(stored) => stats.restore(stored),
            Err(e) => warn!(tier = TIER, "cannot load statistics: {}", e),
        }

        info!(tier = TIER, db_path = %db_path.display(), "opened sqlite cache");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            db_path,
            default_ttl,
            lock_timeout,
            stats,
        })
    }

    /// Create from a validated `sqlite` config
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let db_path = config
            .db_path
            .clone()
            .ok_or_else(|| Error::Config("sqlite tier requires a db_path".to_string()))?;
        Self::with_lock_timeout(db_path, config.default_ttl(), config.lock_timeout())
    }

    fn open_connection(db_path: &Path, lock_timeout: Duration) -> Result<Connection> {
        let conn = if db_path.as_os_str() == IN_MEMORY_DB_PATH {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(db_path)?;
            let mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            debug!(tier = TIER, journal_mode = %mode, "configured journal");
            conn
        };

        conn.busy_timeout(lock_timeout)?;
        conn.execute_batch(SCHEMA)?;
        {
            let mut seed =
                conn.prepare("INSERT OR IGNORE INTO cache_stats (name, value) VALUES (?1, 0)")?;
            for name in COUNTER_NAMES {
                seed.execute(params![name])?;
            }
        }
        Ok(conn)
    }

    fn load_counters(conn: &Connection) -> rusqlite::Result<Counters> {
        let mut stmt = conn.prepare("SELECT name, value FROM cache_stats")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counters = Counters::default();
        for row in rows {
            let (name, value) = row?;
            counters.set_named(&name, value.max(0) as u64);
        }
        Ok(counters)
    }

    /// Add counter increments since the last flush to `cache_stats`
    fn flush_stats(&self, conn: &Connection) {
        let delta = self.stats.take_unflushed();
        if delta.is_zero() {
            return;
        }

        let written = conn.unchecked_transaction().and_then(|tx| {
            {
                let mut stmt =
                    tx.prepare_cached("UPDATE cache_stats SET value = value + ?1 WHERE name = ?2")?;
                for (name, value) in delta.named() {
                    if value > 0 {
                        stmt.execute(params![i64::try_from(value).unwrap_or(i64::MAX), name])?;
                    }
                }
            }
            tx.commit()
        });

        if let Err(e) = written {
            warn!(tier = TIER, "cannot persist statistics: {}", e);
            self.stats.return_unflushed(delta);
        }
    }

    /// Database path
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Option<MutexGuard<'_, Option<Connection>>> {
        self.conn.try_lock_for(self.lock_timeout)
    }

    /// Acquire the open connection, or explain why not
    fn lock_for_write(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        let guard = self.lock().ok_or_else(|| Error::LockTimeout {
            tier: TIER.to_string(),
            waited_ms: self.lock_timeout.as_millis() as u64,
        })?;
        if guard.is_none() {
            return Err(Error::Closed {
                tier: TIER.to_string(),
            });
        }
        Ok(guard)
    }

    fn delete_key(conn: &Connection, key: &str) -> rusqlite::Result<usize> {
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
    }

    fn delete_if_expired(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
        conn.execute(DELETE_EXPIRED_ROW, params![key, now_millis()])
            .map(|n| n > 0)
    }

    fn delete_keys(conn: &mut Connection, keys: &[&str]) -> rusqlite::Result<usize> {
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM cache_entries WHERE key = ?1")?;
            for key in keys {
                removed += stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

impl CacheProvider for SqliteCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Sqlite
    }

    fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        if !valid_key(key) {
            self.stats.record_miss();
            return None;
        }
        let Some(guard) = self.lock() else {
            warn!(tier = TIER, key, "lock wait exceeded on get, reporting miss");
            self.stats.record_miss();
            return None;
        };
        let Some(conn) = guard.as_ref() else {
            self.stats.record_miss();
            return None;
        };

        let row = conn
            .query_row(SELECT_ROW, params![key], |row| read_row(row, 0))
            .optional();

        match row {
            Ok(None) => {
                self.stats.record_miss();
                None
            }
            Ok(Some(row)) => {
                let entry = row_entry(row);
                if entry.is_expired() {
                    match Self::delete_if_expired(conn, key) {
                        Ok(true) => self.stats.record_expiration(),
                        Ok(false) => debug!(tier = TIER, key, "expired row already replaced"),
                        Err(e) => warn!(tier = TIER, key, "cannot delete expired row: {}", e),
                    }
                    self.stats.record_miss();
                    return None;
                }
                self.stats.record_hit();
                Some(entry)
            }
            Err(e) if is_corrupt_row(&e) => {
                warn!(tier = TIER, key, "deleting corrupt row: {}", e);
                if let Err(e) = Self::delete_key(conn, key) {
                    warn!(tier = TIER, key, "cannot delete corrupt row: {}", e);
                }
                self.stats.record_miss();
                None
            }
            Err(e) => {
                warn!(tier = TIER, key, "read failed, reporting miss: {}", e);
                self.stats.record_miss();
                None
            }
        }
    }

    fn set(&self, key: &str, value: Bytes, ttl: Expiry) -> Result<()> {
        if !valid_key(key) {
            return Err(Error::write(TIER, "empty key"));
        }
        let mut guard = self.lock_for_write()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Closed { tier: TIER.to_string() })?;

        let ttl_ms = ttl_column(ttl.resolve(self.default_ttl));
        let tx = conn.transaction().map_err(|e| Error::write(TIER, e))?;
        tx.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, created_at, ttl_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, &value[..], now_millis(), ttl_ms],
        )
        .map_err(|e| Error::write(TIER, e))?;
        tx.commit().map_err(|e| Error::write(TIER, e))?;

        self.stats.record_set();
        self.flush_stats(conn);
        Ok(())
    }

    fn promote(&self, key: &str, entry: &CacheEntry) -> Result<bool> {
        if !valid_key(key) {
            return Err(Error::write(TIER, "empty key"));
        }
        let guard = self.lock_for_write()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::Closed { tier: TIER.to_string() })?;

        let now = now_millis();
        if entry.is_expired_at(now) {
            return Ok(false);
        }
        let copy = entry.promoted_copy(self.default_ttl, now);
        let stored = conn
            .execute(
                PROMOTE_ROW,
                params![
                    key,
                    &copy.value()[..],
                    copy.created_at_ms(),
                    ttl_ms_column(copy.ttl_ms()),
                    now
                ],
            )
            .map_err(|e| Error::write(TIER, e))?
            > 0;

        if stored {
            self.stats.record_set();
            self.flush_stats(conn);
        }
        Ok(stored)
    }

    fn remove(&self, key: &str) -> bool {
        let Some(guard) = self.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(conn) => Self::delete_key(conn, key).is_ok_and(|n| n > 0),
            None => false,
        }
    }

    fn invalidate(&self, keys: &[&str]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let Some(mut guard) = self.lock() else {
            return 0;
        };
        let Some(conn) = guard.as_mut() else {
            return 0;
        };

        Self::delete_keys(conn, keys).unwrap_or_else(|e| {
            warn!(tier = TIER, "bulk invalidation failed: {}", e);
            0
        })
    }

    fn pre_warm(&self, items: Vec<(String, Bytes)>) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        if items.iter().any(|(key, _)| !valid_key(key)) {
            return Err(Error::write(TIER, "empty key in pre-warm batch"));
        }
        let mut guard = self.lock_for_write()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Closed { tier: TIER.to_string() })?;

        let created_at = now_millis();
        let ttl_ms = ttl_column(self.default_ttl);
        let tx = conn.transaction().map_err(|e| Error::write(TIER, e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO cache_entries (key, value, created_at, ttl_ms)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(|e| Error::write(TIER, e))?;
            for (key, value) in &items {
                stmt.execute(params![key, &value[..], created_at, ttl_ms])
                    .map_err(|e| Error::write(TIER, e))?;
            }
        }
        tx.commit().map_err(|e| Error::write(TIER, e))?;

        self.stats.record_sets(items.len() as u64);
        self.flush_stats(conn);
        debug!(tier = TIER, count = items.len(), "pre-warmed cache");
        Ok(items.len())
    }

    fn clear(&self) -> Result<()> {
        let guard = self.lock_for_write()?;
        if let Some(conn) = guard.as_ref() {
            conn.execute("DELETE FROM cache_entries", [])
                .map_err(|e| Error::write(TIER, e))?;
        }
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let Some(guard) = self.lock() else {
            return 0;
        };
        let Some(conn) = guard.as_ref() else {
            return 0;
        };

        match conn.execute(
            "DELETE FROM cache_entries
             WHERE ttl_ms IS NOT NULL AND created_at + ttl_ms < ?1",
            params![now_millis()],
        ) {
            Ok(purged) => {
                self.stats.record_expirations(purged as u64);
                if purged > 0 {
                    info!(tier = TIER, purged, "swept expired rows");
                }
                self.flush_stats(conn);
                purged
            }
            Err(e) => {
                warn!(tier = TIER, "expiration sweep failed: {}", e);
                0
            }
        }
    }

    fn entries(&self) -> Result<Vec<(String, CacheEntry)>> {
        let guard = self.lock_for_write()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::Closed { tier: TIER.to_string() })?;

        let mut stmt = conn.prepare(
            "SELECT key, value, created_at, ttl_ms FROM cache_entries
             WHERE ttl_ms IS NULL OR created_at + ttl_ms >= ?1
             ORDER BY key",
        )?;
        let rows = stmt.query_map(params![now_millis()], |row| {
            Ok((row.get::<_, String>(0)?, read_row(row, 1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            match row {
                Ok((key, row)) => entries.push((key, row_entry(row))),
                Err(e) if is_corrupt_row(&e) => warn!(tier = TIER, "skipping corrupt row: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    fn stats(&self) -> CacheStats {
        let counts = self.lock().and_then(|guard| {
            let conn = guard.as_ref()?;
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN ttl_ms IS NOT NULL AND created_at + ttl_ms < ?1
                                          THEN 1 ELSE 0 END), 0)
                 FROM cache_entries",
                params![now_millis()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(|e| warn!(tier = TIER, "stats query failed: {}", e))
            .ok()
        });

        let (size, pending) = counts.unwrap_or((0, 0));
        let mut stats = self.stats.snapshot(CacheKind::Sqlite, size.max(0) as u64);
        stats.pending_expired = counts.map(|_| pending.max(0) as u64);
        stats.default_ttl_seconds = self.default_ttl.map(|ttl| ttl.as_secs());
        stats.location = Some(self.db_path.display().to_string());
        stats
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.conn.try_lock_for(self.lock_timeout).ok_or_else(|| {
            Error::LockTimeout {
                tier: TIER.to_string(),
                waited_ms: self.lock_timeout.as_millis() as u64,
            }
        })?;
        if let Some(conn) = guard.take() {
            self.flush_stats(&conn);
            conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
            info!(tier = TIER, db_path = %self.db_path.display(), "closed sqlite cache");
        }
        Ok(())
    }
}

impl Drop for SqliteCache {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            self.flush_stats(&conn);
        }
    }
}

impl std::fmt::Debug for SqliteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCache")
            .field("db_path", &self.db_path)
            .field("default_ttl", &self.default_ttl)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
