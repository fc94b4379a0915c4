//! Warm-up Data
//!
//! Canned analysis results for common file kinds, used to seed an empty
//! cache. Callers may layer their own JSON map on top; a key present in
//! both takes the caller's value.

use std::path::Path;

use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Built-in warm-up entries, keyed by file kind
pub fn default_warmup() -> Map<String, Value> {
    let mut items = Map::new();
    items.insert(
        "python_script".to_string(),
        analysis("code", "python", "script", &["executable", "imports", "procedural"], 0.95),
    );
    items.insert(
        "markdown_doc".to_string(),
        analysis(
            "documentation",
            "markdown",
            "documentation",
            &["formatted text", "headings", "lists"],
            0.95,
        ),
    );
    items.insert(
        "json_config".to_string(),
        analysis(
            "configuration",
            "json",
            "settings",
            &["structured data", "key-value pairs"],
            0.95,
        ),
    );
    items.insert(
        "text_file".to_string(),
        analysis("text", "plaintext", "documentation", &["unformatted text"], 0.90),
    );
    items.insert(
        "javascript_module".to_string(),
        analysis(
            "code",
            "javascript",
            "module",
            &["imports", "exports", "functions"],
            0.95,
        ),
    );
    items
}

fn analysis(
    file_type: &str,
    language: &str,
    purpose: &str,
    characteristics: &[&str],
    confidence: f64,
) -> Value {
    json!({
        "file_type": file_type,
        "language": language,
        "purpose": purpose,
        "characteristics": characteristics,
        "confidence": confidence,
    })
}

/// Read a JSON object of extra warm-up entries
pub fn load_warmup_file(path: impl AsRef<Path>) -> Result<Map<String, Value>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read warm-up file {}: {}", path.display(), e))
    })?;
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Config(format!(
            "warm-up file {} must hold a JSON object",
            path.display()
        ))),
        Err(e) => Err(Error::Config(format!(
            "invalid warm-up file {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Built-in entries overlaid with `extra`, serialized for `pre_warm`
pub fn warmup_items(extra: Option<Map<String, Value>>) -> Vec<(String, Bytes)> {
    let mut items = default_warmup();
    if let Some(extra) = extra {
        items.extend(extra);
    }
    items
        .into_iter()
        .map(|(key, value)| (key, Bytes::from(value.to_string())))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
