//! Persistent File Tier
//!
//! One file per entry under a root directory. Survives restarts and suits
//! large payloads.
//!
//! # Layout
//!
//! - Filename: lowercase hex SHA-256 of the key (64 characters)
//! - Contents: `ACF1` magic followed by a bincode envelope holding the key,
//!   creation time, TTL, payload checksum and payload
//! - Writes go to a temp file in the same directory and are renamed into
//!   place, so readers see either the old entry or the new one
//!
//! Corrupt files (bad magic, undecodable envelope, key or checksum mismatch)
//! are deleted when found and reported as misses.
//!
//! Counters persist in `cache_stats.json` next to the entries. They are
//! written on sweep, close and drop.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheKind};
use super::entry::{
    fx_hash, is_expired_at, now_millis, promotion_replaces, ttl_to_millis, valid_key, CacheEntry,
};
use super::metrics::{CacheStats, Counters, StatsTracker};
use super::policy::Expiry;
use super::provider::CacheProvider;
use crate::error::{Error, Result};

const TIER: &str = "file";

/// Leading bytes of every entry file
const MAGIC: &[u8; 4] = b"ACF1";

/// Largest envelope the decoder will accept (1 GiB)
const MAX_ENTRY_BYTES: usize = 1 << 30;

/// Prefix of in-flight temp files
const TEMP_PREFIX: &str = ".tmp-";

/// Persisted counters, kept by `clear`
const STATS_FILE: &str = "cache_stats.json";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    created_at_ms: i64,
    ttl_ms: Option<u64>,
    checksum: u64,
    value: Bytes,
}

impl Envelope {
    fn encode(&self) -> std::result::Result<Vec<u8>, bincode::error::EncodeError> {
        let body = bincode::serde::encode_to_vec(
            self,
            bincode::config::standard().with_limit::<MAX_ENTRY_BYTES>(),
        )?;
        let mut buf = Vec::with_capacity(MAGIC.len() + body.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    fn decode(data: &[u8]) -> std::result::Result<Self, String> {
        let body = data
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| "missing magic header".to_string())?;
        let (envelope, read) = bincode::serde::decode_from_slice::<Envelope, _>(
            body,
            bincode::config::standard().with_limit::<MAX_ENTRY_BYTES>(),
        )
        .map_err(|e| e.to_string())?;

        if read != body.len() {
            return Err(format!("{} trailing bytes", body.len() - read));
        }
        if fx_hash(&envelope.value) != envelope.checksum {
            return Err("payload checksum mismatch".to_string());
        }
        Ok(envelope)
    }
}

enum ReadOutcome {
    Missing,
    Unreadable,
    Corrupt(String),
    Found(Envelope),
}

/// Filename for a key: hex SHA-256 digest
pub fn key_filename(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn is_entry_filename(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// File-per-entry persistent tier
pub struct FileCache {
    root: PathBuf,
    default_ttl: Option<Duration>,
    closed: AtomicBool,
    /// Serializes renames and deletes that depend on a file's current contents
    write_lock: Mutex<()>,
    stats: StatsTracker,
}

impl FileCache {
    /// Open (creating if needed) a file tier rooted at `root`
    pub fn new(root: impl Into<PathBuf>, default_ttl: Option<Duration>) -> Result<Self> {
        let root = root.into();
        if default_ttl == Some(Duration::ZERO) {
            return Err(Error::Config(
                "file tier: default TTL must be greater than zero".to_string(),
            ));
        }
        fs::create_dir_all(&root).map_err(|e| {
            Error::Config(format!(
                "file tier: cannot create directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let stats = StatsTracker::new();
        stats.restore(Self::load_counters(&root.join(STATS_FILE)));

        info!(tier = TIER, root = %root.display(), "opened file cache");
        Ok(Self {
            root,
            default_ttl,
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            stats,
        })
    }

    /// Create from a validated `file` config
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let directory = config
            .directory
            .clone()
            .ok_or_else(|| Error::Config("file tier requires a directory".to_string()))?;
        Self::new(directory, config.default_ttl())
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backing file for a key
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key_filename(key))
    }

    /// Persisted counters file
    pub fn stats_path(&self) -> PathBuf {
        self.root.join(STATS_FILE)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if !valid_key(key) {
            return Err(Error::write(TIER, "empty key"));
        }
        if self.is_closed() {
            return Err(Error::Closed {
                tier: TIER.to_string(),
            });
        }
        Ok(())
    }

    fn read_envelope(path: &Path) -> ReadOutcome {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return ReadOutcome::Missing,
            Err(e) => {
                warn!(tier = TIER, path = %path.display(), "cannot read cache file: {}", e);
                return ReadOutcome::Unreadable;
            }
        };
        match Envelope::decode(&data) {
            Ok(envelope) => ReadOutcome::Found(envelope),
            Err(reason) => ReadOutcome::Corrupt(reason),
        }
    }

    fn unlink(path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(tier = TIER, path = %path.display(), "cannot delete cache file: {}", e);
                false
            }
        }
    }

    /// Delete a corrupt or misplaced file if it is still bad under the write lock
    fn discard(&self, path: &Path, reason: &str) {
        let _guard = self.write_lock.lock();
        let still_bad = match Self::read_envelope(path) {
            ReadOutcome::Corrupt(_) => true,
            ReadOutcome::Found(envelope) => !owns(path, &envelope.key),
            ReadOutcome::Missing | ReadOutcome::Unreadable => false,
        };
        if still_bad {
            warn!(tier = TIER, path = %path.display(), reason, "deleting corrupt cache file");
            Self::unlink(path);
        }
    }

    /// Delete an expired entry file unless a writer replaced it meanwhile
    fn remove_expired(&self, path: &Path) -> bool {
        let _guard = self.write_lock.lock();
        match Self::read_envelope(path) {
            ReadOutcome::Found(current)
                if is_expired_at(current.created_at_ms, current.ttl_ms, now_millis()) =>
            {
                Self::unlink(path)
            }
            _ => false,
        }
    }

    fn entry_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }
            if dir_entry.file_name().to_str().is_some_and(is_entry_filename) {
                files.push(dir_entry.path());
            }
        }
        Ok(files)
    }

    /// Write `contents` to a synced temp file in the root, ready to rename
    fn stage(&self, contents: &[u8]) -> std::io::Result<NamedTempFile> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.root)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_data()?;
        Ok(tmp)
    }

    fn write_error(path: &Path, err: impl std::fmt::Display) -> Error {
        Error::write(TIER, format!("{}: {}", path.display(), err))
    }

    fn load_counters(path: &Path) -> Counters {
        match fs::read(path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                warn!(tier = TIER, path = %path.display(), "ignoring unreadable statistics: {}", e);
                Counters::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Counters::default(),
            Err(e) => {
                warn!(tier = TIER, path = %path.display(), "cannot read statistics: {}", e);
                Counters::default()
            }
        }
    }

    /// Add counter increments since the last flush to the stats file
    fn flush_stats(&self) {
        let delta = self.stats.take_unflushed();
        if delta.is_zero() {
            return;
        }

        let path = self.stats_path();
        let _guard = self.write_lock.lock();
        let total = Self::load_counters(&path).saturating_add(delta);
        let written = serde_json::to_vec_pretty(&total)
            .map_err(std::io::Error::from)
            .and_then(|json| self.stage(&json))
            .and_then(|tmp| tmp.persist(&path).map_err(|e| e.error));

        match written {
            Ok(_) => debug!(tier = TIER, "persisted statistics"),
            Err(e) => {
                warn!(tier = TIER, path = %path.display(), "cannot persist statistics: {}", e);
                self.stats.return_unflushed(delta);
            }
        }
    }
}

fn owns(path: &Path, key: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == key_filename(key))
}

impl CacheProvider for FileCache {
    fn kind(&self) -> CacheKind {
        CacheKind::File
    }

    fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        if self.is_closed() || !valid_key(key) {
            self.stats.record_miss();
            return None;
        }

        let path = self.path_for(key);
        let envelope = match Self::read_envelope(&path) {
            ReadOutcome::Found(envelope) if envelope.key == key => envelope,
            ReadOutcome::Found(_) => {
                self.discard(&path, "stored key does not match");
                self.stats.record_miss();
                return None;
            }
            ReadOutcome::Corrupt(reason) => {
                self.discard(&path, &reason);
                self.stats.record_miss();
                return None;
            }
            ReadOutcome::Missing | ReadOutcome::Unreadable => {
                self.stats.record_miss();
                return None;
            }
        };

        if is_expired_at(envelope.created_at_ms, envelope.ttl_ms, now_millis()) {
            if self.remove_expired(&path) {
                self.stats.record_expiration();
            } else {
                debug!(tier = TIER, key, "expired file already replaced or gone");
            }
            self.stats.record_miss();
            return None;
        }

        self.stats.record_hit();
        Some(CacheEntry::with_timestamps(
            envelope.value,
            envelope.created_at_ms,
            envelope.ttl_ms,
        ))
    }

    fn set(&self, key: &str, value: Bytes, ttl: Expiry) -> Result<()> {
        self.check_writable(key)?;

        let envelope = Envelope {
            key: key.to_string(),
            created_at_ms: now_millis(),
            ttl_ms: ttl.resolve(self.default_ttl).map(ttl_to_millis),
            checksum: fx_hash(&value),
            value,
        };
        let contents = envelope.encode().map_err(|e| Error::write(TIER, e))?;

        let path = self.path_for(key);
        let tmp = self
            .stage(&contents)
            .map_err(|e| Self::write_error(&path, e))?;
        {
            let _guard = self.write_lock.lock();
            tmp.persist(&path)
                .map_err(|e| Self::write_error(&path, e.error))?;
        }

        self.stats.record_set();
        Ok(())
    }

    fn promote(&self, key: &str, entry: &CacheEntry) -> Result<bool> {
        self.check_writable(key)?;

        let now = now_millis();
        if entry.is_expired_at(now) {
            return Ok(false);
        }
        let copy = entry.promoted_copy(self.default_ttl, now);
        let envelope = Envelope {
            key: key.to_string(),
            created_at_ms: copy.created_at_ms(),
            ttl_ms: copy.ttl_ms(),
            checksum: copy.checksum(),
            value: copy.into_value(),
        };
        let contents = envelope.encode().map_err(|e| Error::write(TIER, e))?;

        let path = self.path_for(key);
        let tmp = self
            .stage(&contents)
            .map_err(|e| Self::write_error(&path, e))?;

        let _guard = self.write_lock.lock();
        if let ReadOutcome::Found(stored) = Self::read_envelope(&path) {
            if stored.key == key
                && !promotion_replaces(
                    envelope.created_at_ms,
                    stored.created_at_ms,
                    stored.ttl_ms,
                    now_millis(),
                )
            {
                return Ok(false);
            }
        }
        tmp.persist(&path)
            .map_err(|e| Self::write_error(&path, e.error))?;

        self.stats.record_set();
        Ok(true)
    }

    fn remove(&self, key: &str) -> bool {
        if self.is_closed() || !valid_key(key) {
            return false;
        }
        let _guard = self.write_lock.lock();
        Self::unlink(&self.path_for(key))
    }

    fn clear(&self) -> Result<()> {
        let entries = fs::read_dir(&self.root).map_err(|e| Error::write(TIER, e))?;
        let _guard = self.write_lock.lock();

        let mut failed = 0usize;
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            if !path.is_file() || dir_entry.file_name() == STATS_FILE {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(tier = TIER, path = %path.display(), "cannot delete cache file: {}", e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(Error::write(
                TIER,
                format!("{} file(s) could not be deleted", failed),
            ));
        }
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let files = match self.entry_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(tier = TIER, "cannot scan cache directory: {}", e);
                return 0;
            }
        };

        let now = now_millis();
        let mut purged = 0;
        for path in files {
            match Self::read_envelope(&path) {
                ReadOutcome::Found(envelope) if !owns(&path, &envelope.key) => {
                    self.discard(&path, "stored key does not match filename");
                }
                ReadOutcome::Found(envelope) => {
                    if is_expired_at(envelope.created_at_ms, envelope.ttl_ms, now)
                        && self.remove_expired(&path)
                    {
                        purged += 1;
                    }
                }
                ReadOutcome::Corrupt(reason) => self.discard(&path, &reason),
                ReadOutcome::Missing | ReadOutcome::Unreadable => {}
            }
        }

        self.stats.record_expirations(purged as u64);
        if purged > 0 {
            info!(tier = TIER, purged, "swept expired cache files");
        }
        self.flush_stats();
        purged
    }

    fn entries(&self) -> Result<Vec<(String, CacheEntry)>> {
        if self.is_closed() {
            return Err(Error::Closed {
                tier: TIER.to_string(),
            });
        }

        let now = now_millis();
        let mut entries = Vec::new();
        for path in self.entry_files()? {
            if let ReadOutcome::Found(envelope) = Self::read_envelope(&path) {
                if owns(&path, &envelope.key)
                    && !is_expired_at(envelope.created_at_ms, envelope.ttl_ms, now)
                {
                    let entry = CacheEntry::with_timestamps(
                        envelope.value,
                        envelope.created_at_ms,
                        envelope.ttl_ms,
                    );
                    entries.push((envelope.key, entry));
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn stats(&self) -> CacheStats {
        let size = self.entry_files().map(|files| files.len()).unwrap_or(0);
        let mut stats = self.stats.snapshot(CacheKind::File, size as u64);
        stats.default_ttl_seconds = self.default_ttl.map(|ttl| ttl.as_secs());
        stats.location = Some(self.root.display().to_string());
        stats
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.flush_stats();
        Ok(())
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        self.flush_stats();
    }
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("root", &self.root)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
