//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TETHER_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{LogFormat, TetherSettings, WriteRateSettings};

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid combination of
/// values is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    load_settings_with_env(path, &|name| std::env::var(name).ok())
}

/// Load settings from `path`, reading overrides through `env`.
pub fn load_settings_with_env(
    path: &Path,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
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

/// Apply `TETHER_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply `TETHER_*` overrides read through `env`.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning. A zero keepalive or stale timeout disables it.
pub fn apply_overrides(settings: &mut TetherSettings, env: &dyn Fn(&str) -> Option<String>) {
    let session = &mut settings.session;

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = read_string(env, "TETHER_SESSION_NAME") {
        session.name = v;
    }
    if let Some(v) = read_u64(env, "TETHER_KEEPALIVE_INTERVAL_MS", 0, 3_600_000) {
        session.keepalive_interval_ms = (v > 0).then_some(v);
    }
    if let Some(v) = read_u64(env, "TETHER_PROBE_TIMEOUT_MS", 100, 600_000) {
        session.probe_timeout_ms = v;
    }
    if let Some(v) = read_u64(env, "TETHER_STALE_TIMEOUT_MS", 0, 86_400_000) {
        session.stale_timeout_ms = (v > 0).then_some(v);
    }
    if let Some(v) = read_u64(env, "TETHER_STALE_GRACE_MS", 0, 86_400_000) {
        session.stale_grace_ms = v;
    }
    if let Some(v) = read_u32(env, "TETHER_MAX_ATTEMPTS", 0, 1_000_000) {
        session.max_attempts = v;
    }

    // ── Reconnect ───────────────────────────────────────────────────
    if let Some(v) = read_bool(env, "TETHER_RECONNECT_ENABLED") {
        session.reconnect.enabled = v;
    }
    if let Some(v) = read_u64(env, "TETHER_BACKOFF_BASE_MS", 1, 3_600_000) {
        session.reconnect.base_delay_ms = v;
    }
    if let Some(v) = read_u64(env, "TETHER_BACKOFF_MAX_MS", 1, 3_600_000) {
        session.reconnect.max_delay_ms = v;
    }

    // ── Write rate ──────────────────────────────────────────────────
    if let Some(v) = read_f64_positive(env, "TETHER_WRITE_RATE") {
        session
            .write_rate
            .get_or_insert_with(WriteRateSettings::default)
            .per_second = v;
    }
    if let Some(v) = read_u32(env, "TETHER_WRITE_BURST", 1, 100_000) {
        session
            .write_rate
            .get_or_insert_with(WriteRateSettings::default)
            .burst = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string(env, "TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_string(env, "TETHER_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "TETHER_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a finite, strictly positive `f64`.
pub fn parse_f64_positive(val: &str) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n > 0.0).then_some(n)
}

/// Parse a log format name.
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "compact" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

type Env<'a> = &'a dyn Fn(&str) -> Option<String>;

fn read_string(env: Env<'_>, name: &str) -> Option<String> {
    env(name).filter(|v| !v.is_empty())
}

fn read_bool(env: Env<'_>, name: &str) -> Option<bool> {
    let val = env(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_u32(env: Env<'_>, name: &str, min: u32, max: u32) -> Option<u32> {
    let val = env(name)?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_u64(env: Env<'_>, name: &str, min: u64, max: u64) -> Option<u64> {
    let val = env(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_f64_positive(env: Env<'_>, name: &str) -> Option<f64> {
    let val = env(name)?;
    let result = parse_f64_positive(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid rate env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
