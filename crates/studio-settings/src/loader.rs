//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`StudioSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use studio_core::logging::LogFormat;
use tracing::debug;

use crate::errors::Result;
use crate::types::{BusBackend, StudioSettings};

/// Load compiled defaults with env var overrides, without a settings file.
pub fn load_settings() -> Result<StudioSettings> {
    let mut settings = StudioSettings::default();
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<StudioSettings> {
    let defaults = serde_json::to_value(StudioSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: StudioSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_env_overrides(settings: &mut StudioSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("STUDIO_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("STUDIO_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("STUDIO_WS_PATH") {
        settings.server.ws_path = v;
    }
    if let Some(v) = read_env_usize("STUDIO_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_string("FRONTEND_URL") {
        settings.server.cors_origin = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read_env_string("STUDIO_PRIVILEGED_ROLE") {
        settings.auth.privileged_role = v;
    }

    // ── Bus ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("REDIS_URL") {
        settings.bus.url = v;
    }
    if let Some(v) = read_env_string("STUDIO_BUS_CHANNEL") {
        settings.bus.channel = v;
    }
    if let Some(v) = read_env_string("STUDIO_BUS_BACKEND") {
        match parse_bus_backend(&v) {
            Some(backend) => settings.bus.backend = backend,
            None => tracing::warn!(key = "STUDIO_BUS_BACKEND", value = %v, "unknown bus backend, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("STUDIO_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("STUDIO_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "STUDIO_LOG_FORMAT", value = %v, "unknown log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a bus backend name (case-insensitive).
pub fn parse_bus_backend(val: &str) -> Option<BusBackend> {
    match val.to_ascii_lowercase().as_str() {
        "redis" => Some(BusBackend::Redis),
        "memory" | "inmemory" | "in-memory" => Some(BusBackend::Memory),
        _ => None,
    }
}

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_ascii_lowercase().as_str() {
        "compact" | "pretty" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3001, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
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
    fn merge_array_and_primitive_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3], "name": "a"}),
            serde_json::json!({"items": [4], "name": "b"}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
        assert_eq!(merged["name"], "b");
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_backend_names() {
        assert_eq!(parse_bus_backend("Redis"), Some(BusBackend::Redis));
        assert_eq!(parse_bus_backend("memory"), Some(BusBackend::Memory));
        assert_eq!(parse_bus_backend("kafka"), None);
    }

    #[test]
    fn parse_format_names() {
        assert_eq!(parse_log_format("JSON"), Some(LogFormat::Json));
        assert_eq!(parse_log_format("compact"), Some(LogFormat::Compact));
        assert_eq!(parse_log_format("xml"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 0, 65535), Some(8080));
        assert_eq!(parse_u16_range("70000", 0, 65535), None);
        assert_eq!(parse_u16_range("abc", 0, 65535), None);
        assert_eq!(parse_usize_range("0", 1, 10), None);
        assert_eq!(parse_usize_range("5", 1, 10), Some(5));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.ws_path, "/ws/studio");
        assert_eq!(settings.store.cache_prefix, "studio:config:");
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"maxConnections":7},"auth":{"privilegedRole":"ROOT"},"store":{"cachePrefix":"x:"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.max_connections, 7);
        assert_eq!(settings.server.send_buffer_size, 256);
        assert_eq!(settings.store.cache_prefix, "x:");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }
}
