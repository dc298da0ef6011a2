//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientSettings::default()`]
//! 2. If `~/.casino/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CASINO_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ClientSettings;

/// Root directory for client state (`~/.casino`).
pub fn casino_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".casino")
}

/// Resolve the path to the settings file (`~/.casino/settings.json`).
pub fn settings_path() -> PathBuf {
    casino_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<ClientSettings> {
    let defaults = serde_json::to_value(ClientSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Check invariants the rest of the client relies on.
pub fn validate(settings: &ClientSettings) -> Result<()> {
    let url = settings.connection.url.trim();
    if url.is_empty() {
        return Err(SettingsError::InvalidValue("connection.url is empty".into()));
    }
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(SettingsError::InvalidValue(format!(
            "connection.url must use ws:// or wss://, got {url}"
        )));
    }
    if settings.connection.request_timeout_ms == Some(0) {
        return Err(SettingsError::InvalidValue(
            "connection.requestTimeoutMs must be positive".into(),
        ));
    }
    Ok(())
}

/// Apply `CASINO_*` environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut ClientSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` as the variable source.
pub fn apply_overrides_from<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("CASINO_WS_URL") {
        settings.connection.url = v;
    }
    if let Some(v) = read_with(&lookup, "CASINO_AUTO_RECONNECT", parse_bool) {
        settings.connection.auto_reconnect = v;
    }
    if let Some(v) = read_with(&lookup, "CASINO_RECONNECT_INTERVAL_MS", |s| {
        parse_u64_range(s, 1, 3_600_000)
    }) {
        settings.connection.reconnect_interval_ms = v;
    }
    if let Some(v) = read_with(&lookup, "CASINO_MAX_RECONNECT_ATTEMPTS", |s| {
        parse_u32_range(s, 0, 1_000_000)
    }) {
        settings.connection.max_reconnect_attempts = v;
    }
    if let Some(v) = read_with(&lookup, "CASINO_REQUEST_TIMEOUT_MS", |s| {
        parse_u64_range(s, 1, 3_600_000)
    }) {
        settings.connection.request_timeout_ms = Some(v);
    }
    if let Some(v) = string("CASINO_CLIENT_TYPE") {
        settings.connection.client_type = v;
    }
    if let Some(v) = string("CASINO_DATA_DIR") {
        settings.storage.data_dir = v;
    }
    if let Some(v) = string("CASINO_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_with(&lookup, "CASINO_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn read_with<F, P, T>(lookup: &F, name: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"connection": {"url": "ws://a", "autoReconnect": true}});
        let source = serde_json::json!({"connection": {"url": "ws://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["connection"]["url"], "ws://b");
        assert_eq!(merged["connection"]["autoReconnect"], true);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = merge_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, ClientSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"connection": {"url": "ws://127.0.0.1:7000/ws", "maxReconnectAttempts": 3}}"#,
        )
        .unwrap();

        let settings = merge_file(&path).unwrap();
        assert_eq!(settings.connection.url, "ws://127.0.0.1:7000/ws");
        assert_eq!(settings.connection.max_reconnect_attempts, 3);
        assert_eq!(settings.connection.reconnect_interval_ms, 1000);
        assert!(settings.connection.auto_reconnect);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_wrong_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"autoReconnect": "sometimes"}}"#).unwrap();

        assert!(matches!(merge_file(&path).unwrap_err(), SettingsError::Json(_)));
    }

    // ── validate ────────────────────────────────────────────────────

    #[test]
    fn validate_defaults() {
        validate(&ClientSettings::default()).unwrap();
    }

    #[test]
    fn validate_rejects_empty_url() {
        let mut settings = ClientSettings::default();
        settings.connection.url = "  ".into();
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn validate_rejects_http_url() {
        let mut settings = ClientSettings::default();
        settings.connection.url = "https://example.com".into();
        assert!(matches!(validate(&settings), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut settings = ClientSettings::default();
        settings.connection.request_timeout_ms = Some(0);
        assert!(validate(&settings).is_err());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = ClientSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("CASINO_WS_URL", "ws://localhost:1/ws"),
                ("CASINO_AUTO_RECONNECT", "off"),
                ("CASINO_RECONNECT_INTERVAL_MS", "250"),
                ("CASINO_MAX_RECONNECT_ATTEMPTS", "0"),
                ("CASINO_REQUEST_TIMEOUT_MS", "5000"),
                ("CASINO_DATA_DIR", "/tmp/casino-test"),
                ("CASINO_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.connection.url, "ws://localhost:1/ws");
        assert!(!settings.connection.auto_reconnect);
        assert_eq!(settings.connection.reconnect_interval_ms, 250);
        assert_eq!(settings.connection.max_reconnect_attempts, 0);
        assert_eq!(settings.connection.request_timeout_ms, Some(5000));
        assert_eq!(settings.storage.data_dir, "/tmp/casino-test");
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_ignored() {
        let mut settings = ClientSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("CASINO_AUTO_RECONNECT", "maybe"),
                ("CASINO_RECONNECT_INTERVAL_MS", "0"),
                ("CASINO_REQUEST_TIMEOUT_MS", "soon"),
                ("CASINO_WS_URL", ""),
            ]),
        );
        assert_eq!(settings, ClientSettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("1000", 1, 5000), Some(1000));
        assert_eq!(parse_u64_range("0", 1, 5000), None);
        assert_eq!(parse_u32_range("-1", 0, 10), None);
        assert_eq!(parse_u32_range("10", 0, 10), Some(10));
    }
}
