//! Error types for the analysis cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the analysis cache
///
/// Only [`Error::Config`] is fatal. Everything a `set`, `clear` or
/// `pre_warm` returns is a write failure the caller may ignore: the value is
/// simply not cached. Read faults never reach the caller; tiers log them and
/// report a miss.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Construction
    // =========================================================================
    /// Invalid capacity, TTL, path or tier layout
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Writes (non-fatal)
    // =========================================================================
    /// A tier could not store a value
    #[error("Cache write to {tier} tier failed: {reason}")]
    CacheWrite { tier: String, reason: String },

    /// The tier lock could not be acquired within the configured timeout
    #[error("Timed out after {waited_ms}ms waiting for the {tier} tier lock")]
    LockTimeout { tier: String, waited_ms: u64 },

    /// The tier has been closed
    #[error("The {tier} tier is closed")]
    Closed { tier: String },

    /// Every tier of a tiered cache rejected the write
    #[error("All {} tiers failed: {}", failures.len(), failures.join("; "))]
    AllTiersFailed { failures: Vec<String> },

    /// One or more tiers could not be cleared
    #[error("Clear failed on {} tier(s): {}", failures.len(), failures.join("; "))]
    ClearFailed { failures: Vec<String> },

    // =========================================================================
    // Plumbing
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Build a write error for the named tier
    pub fn write(tier: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::CacheWrite {
            tier: tier.into(),
            reason: reason.to_string(),
        }
    }

    /// True for the non-fatal class of errors (the value was not cached)
    pub fn is_write_error(&self) -> bool {
        !matches!(self, Error::Config(_))
    }

    /// True for construction errors
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Config("bad".into()).is_config_error());
        assert!(!Error::Config("bad".into()).is_write_error());
        assert!(Error::write("file", "disk full").is_write_error());
        assert!(Error::Closed { tier: "sqlite".into() }.is_write_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::write("file", "permission denied");
        assert_eq!(
            err.to_string(),
            "Cache write to file tier failed: permission denied"
        );

        let err = Error::AllTiersFailed {
            failures: vec!["memory: a".into(), "sqlite: b".into()],
        };
        assert_eq!(err.to_string(), "All 2 tiers failed: memory: a; sqlite: b");
    }
}
