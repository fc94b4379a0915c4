//! Expiry and Promotion Policies
//!
//! How a `set` resolves its TTL against the tier default, and how the
//! tiered cache copies lower-tier hits into faster tiers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// TTL requested by a `set`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Use the tier's configured default TTL
    #[default]
    Default,
    /// Never expires; only space pressure or explicit removal drops it
    Never,
    /// Expires this long after creation
    After(Duration),
}

impl Expiry {
    /// Shorthand for `Expiry::After(Duration::from_secs(secs))`
    pub fn seconds(secs: u64) -> Self {
        Expiry::After(Duration::from_secs(secs))
    }

    /// Resolve against a tier default; `None` means no expiry
    pub fn resolve(self, default_ttl: Option<Duration>) -> Option<Duration> {
        match self {
            Expiry::Default => default_ttl,
            Expiry::Never => None,
            Expiry::After(ttl) => Some(ttl),
        }
    }
}

impl From<Option<Duration>> for Expiry {
    fn from(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => Expiry::After(ttl),
            None => Expiry::Default,
        }
    }
}

impl From<Duration> for Expiry {
    fn from(ttl: Duration) -> Self {
        Expiry::After(ttl)
    }
}

/// When promotion writes run relative to the `get` that triggered them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionMode {
    /// Promotion completes before `get` returns; failures are logged and swallowed
    #[default]
    Synchronous,
    /// Promotion is handed to the tokio blocking pool when a runtime is
    /// available, otherwise it runs synchronously
    Background,
}

impl std::fmt::Display for PromotionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromotionMode::Synchronous => write!(f, "synchronous"),
            PromotionMode::Background => write!(f, "background"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
