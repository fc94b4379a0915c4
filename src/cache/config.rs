//! Cache Configuration
//!
//! Declarative description of a single tier or a tier stack. Loadable from
//! YAML or JSON and validated eagerly before anything touches the disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::PromotionMode;
use crate::error::{Error, Result};

/// Default TTL for cache entries (24 hours)
pub const DEFAULT_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Default capacity of the in-memory tier
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default bounded wait for a tier lock
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Directory name used under the home directory for default storage
pub const DEFAULT_DIR_NAME: &str = ".analysis-cache";

/// SQLite path that opens a private in-memory database
pub const IN_MEMORY_DB_PATH: &str = ":memory:";

/// Cache backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Bounded LRU map in process memory
    Memory,
    /// One file per entry under a directory
    #[serde(alias = "filesystem")]
    File,
    /// Single SQLite database file
    Sqlite,
    /// Ordered stack of the above
    Tiered,
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKind::Memory => write!(f, "memory"),
            CacheKind::File => write!(f, "file"),
            CacheKind::Sqlite => write!(f, "sqlite"),
            CacheKind::Tiered => write!(f, "tiered"),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Backend kind
    pub kind: CacheKind,
    /// Capacity of a memory tier (`None` = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
    /// TTL applied by `Expiry::Default` (`None` = never expires)
    #[serde(default, alias = "ttl_seconds", skip_serializing_if = "Option::is_none")]
    pub default_ttl_seconds: Option<u64>,
    /// Root directory of a file tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Database path of a sqlite tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Sub-tiers of a tiered cache, fastest first; a sub-tier may itself be tiered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<CacheConfig>,
    /// Bounded wait for a tier lock before a write is abandoned
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Promotion policy of a tiered cache
    #[serde(default)]
    pub promotion: PromotionMode,
    /// Interval for the optional background expiration sweep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_seconds: Option<u64>,
}

impl CacheConfig {
    fn of_kind(kind: CacheKind) -> Self {
        Self {
            kind,
            max_entries: None,
            default_ttl_seconds: None,
            directory: None,
            db_path: None,
            tiers: Vec::new(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            promotion: PromotionMode::default(),
            sweep_interval_seconds: None,
        }
    }

    /// In-memory tier
    pub fn memory(max_entries: Option<usize>) -> Self {
        Self {
            max_entries,
            ..Self::of_kind(CacheKind::Memory)
        }
    }

    /// File tier rooted at `directory`
    pub fn file(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            ..Self::of_kind(CacheKind::File)
        }
    }

    /// SQLite tier at `db_path` (`":memory:"` for a private in-memory database)
    pub fn sqlite(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(db_path.into()),
            ..Self::of_kind(CacheKind::Sqlite)
        }
    }

    /// Tiered cache over `tiers`, fastest first
    pub fn tiered(tiers: Vec<CacheConfig>) -> Self {
        Self {
            tiers,
            ..Self::of_kind(CacheKind::Tiered)
        }
    }

    /// Default stack: bounded memory tier in front of a SQLite database
    pub fn default_tiered(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref();
        Self::tiered(vec![
            Self::memory(Some(DEFAULT_MAX_ENTRIES)).with_ttl_seconds(Some(DEFAULT_TTL_SECONDS)),
            Self::sqlite(base_dir.join("cache.db")).with_ttl_seconds(Some(DEFAULT_TTL_SECONDS)),
        ])
    }

    /// `$HOME/.analysis-cache`, or `./.analysis-cache` without a home directory
    pub fn default_base_dir() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_DIR_NAME)
    }

    pub fn with_ttl_seconds(mut self, ttl: Option<u64>) -> Self {
        self.default_ttl_seconds = ttl;
        self
    }

    pub fn with_lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn with_promotion(mut self, promotion: PromotionMode) -> Self {
        self.promotion = promotion;
        self
    }

    pub fn with_sweep_interval_seconds(mut self, interval: Option<u64>) -> Self {
        self.sweep_interval_seconds = interval;
        self
    }

    /// Default TTL as a duration
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_seconds.map(Duration::from_secs)
    }

    /// Lock timeout as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Sweep interval as a duration
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_seconds.map(Duration::from_secs)
    }

    /// Parse a YAML document
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Config(format!("invalid YAML config: {}", e)))
    }

    /// Parse a JSON document
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid JSON config: {}", e)))
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            _ => Err(Error::Config(format!(
                "unsupported config format for {} (expected .json, .yaml or .yml)",
                path.display()
            ))),
        }
    }

    /// Validate limits and required fields, recursing into sub-tiers
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == Some(0) {
            return Err(Error::Config(format!(
                "{} tier: max_entries must be greater than zero",
                self.kind
            )));
        }
        if self.default_ttl_seconds == Some(0) {
            return Err(Error::Config(format!(
                "{} tier: default_ttl_seconds must be greater than zero",
                self.kind
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(Error::Config(format!(
                "{} tier: lock_timeout_ms must be greater than zero",
                self.kind
            )));
        }
        if self.sweep_interval_seconds == Some(0) {
            return Err(Error::Config(format!(
                "{} tier: sweep_interval_seconds must be greater than zero",
                self.kind
            )));
        }
        if self.kind != CacheKind::Tiered && !self.tiers.is_empty() {
            return Err(Error::Config(format!(
                "{} tier: only tiered caches may list tiers",
                self.kind
            )));
        }

        match self.kind {
            CacheKind::Memory => Ok(()),
            CacheKind::File => match &self.directory {
                Some(dir) if !dir.as_os_str().is_empty() => Ok(()),
                _ => Err(Error::Config("file tier requires a directory".to_string())),
            },
            CacheKind::Sqlite => match &self.db_path {
                Some(path) if !path.as_os_str().is_empty() => Ok(()),
                _ => Err(Error::Config("sqlite tier requires a db_path".to_string())),
            },
            CacheKind::Tiered => {
                if self.tiers.is_empty() {
                    return Err(Error::Config(
                        "tiered cache requires at least one tier".to_string(),
                    ));
                }
                for (index, tier) in self.tiers.iter().enumerate() {
                    tier.validate().map_err(|e| match e {
                        Error::Config(reason) => Error::Config(format!("tier {}: {}", index, reason)),
                        other => other,
                    })?;
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
