//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ScribeSettings;

/// `~/.scribe`, falling back to `/tmp/.scribe` when HOME is unset.
pub fn scribe_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".scribe")
}

/// Resolve the path to the settings file (`~/.scribe/settings.json`).
pub fn settings_path() -> PathBuf {
    scribe_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ScribeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ScribeSettings> {
    let defaults = serde_json::to_value(ScribeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ScribeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SCRIBE_*` overrides. `lookup` abstracts the environment so the
/// rules are testable without mutating process state.
pub fn apply_env_overrides<F>(settings: &mut ScribeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("SCRIBE_DB_PATH") {
        settings.store.database_path = v;
    }
    if let Some(v) = string("SCRIBE_RELAY_CAPACITY") {
        match parse_usize_range(&v, 1, 1_000_000) {
            Some(n) => settings.relay.channel_capacity = n,
            None => tracing::warn!(key = "SCRIBE_RELAY_CAPACITY", value = %v, "invalid usize env var, ignoring"),
        }
    }
    if let Some(v) = string("SCRIBE_SUBSCRIBER_QUEUE") {
        match parse_usize_range(&v, 1, 1_000_000) {
            Some(n) => settings.relay.subscriber_queue = n,
            None => tracing::warn!(key = "SCRIBE_SUBSCRIBER_QUEUE", value = %v, "invalid usize env var, ignoring"),
        }
    }
    if let Some(v) = string("SCRIBE_GENERATE_TITLES") {
        match parse_bool(&v) {
            Some(b) => settings.engine.generate_titles = b,
            None => tracing::warn!(key = "SCRIBE_GENERATE_TITLES", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = string("SCRIBE_RUN_LEASE_SECS") {
        match parse_usize_range(&v, 1, 86_400) {
            Some(n) => settings.engine.run_lease_secs = n as u64,
            None => tracing::warn!(key = "SCRIBE_RUN_LEASE_SECS", value = %v, "invalid usize env var, ignoring"),
        }
    }
    if let Some(v) = string("SCRIBE_RUNTIME_COMMAND") {
        settings.engine.runtime_command = v;
    }
    if let Some(v) = string("SCRIBE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("SCRIBE_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => tracing::warn!(key = "SCRIBE_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
