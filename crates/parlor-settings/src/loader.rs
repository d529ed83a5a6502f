//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParlorSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PARLOR_*` environment overrides (highest priority)
//! 4. Validate ranges that would otherwise fail at runtime

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ParlorSettings;

/// Resolve the default settings path (`~/.parlor/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parlor").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParlorSettings> {
    let defaults = serde_json::to_value(ParlorSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ParlorSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `PARLOR_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut ParlorSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup.
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept.
pub fn apply_overrides(settings: &mut ParlorSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PARLOR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("PARLOR_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("PARLOR_WS_PATH") {
        settings.server.ws_path = v;
    }
    if let Some(v) = env.string("PARLOR_STATIC_DIR") {
        settings.server.static_dir = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = env.usize("PARLOR_OUTBOUND_QUEUE", 1, 1_000_000) {
        settings.hub.outbound_queue = v;
    }
    if let Some(v) = env.u64("PARLOR_WRITE_TIMEOUT_MS", 10, 3_600_000) {
        settings.hub.write_timeout_ms = v;
    }
    if let Some(v) = env.u64("PARLOR_READ_TIMEOUT_MS", 10, 86_400_000) {
        settings.hub.read_timeout_ms = v;
    }
    if let Some(v) = env.u64("PARLOR_HEARTBEAT_INTERVAL_MS", 10, 3_600_000) {
        settings.hub.heartbeat_interval_ms = v;
    }

    // ── Store / auth ────────────────────────────────────────────────
    if let Some(v) = env.string("PARLOR_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = env.u32("PARLOR_BCRYPT_COST", 4, 31) {
        settings.auth.bcrypt_cost = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PARLOR_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("PARLOR_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject values that would make the server misbehave at runtime.
pub fn validate(settings: &ParlorSettings) -> Result<()> {
    let hub = &settings.hub;
    if hub.outbound_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "hub.outboundQueue must be at least 1".into(),
        ));
    }
    if hub.write_timeout_ms == 0 || hub.read_timeout_ms == 0 || hub.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "hub timeouts and heartbeat interval must be non-zero".into(),
        ));
    }
    if hub.heartbeat_interval_ms >= hub.read_timeout_ms {
        return Err(SettingsError::InvalidValue(format!(
            "hub.heartbeatIntervalMs ({}) must be below hub.readTimeoutMs ({})",
            hub.heartbeat_interval_ms, hub.read_timeout_ms
        )));
    }
    if !(4..=31).contains(&settings.auth.bcrypt_cost) {
        return Err(SettingsError::InvalidValue(format!(
            "auth.bcryptCost must be within 4..=31, got {}",
            settings.auth.bcrypt_cost
        )));
    }
    validate_ws_path(&settings.server.ws_path)
}

/// HTTP routes served next to the WebSocket endpoint.
const RESERVED_PATHS: &[&str] = &["/register", "/login", "/health", "/metrics"];

/// The WebSocket path is registered as a literal route, so it may not
/// collide with another route or use router capture syntax.
fn validate_ws_path(path: &str) -> Result<()> {
    let invalid = |why: &str| -> Result<()> {
        Err(SettingsError::InvalidValue(format!("server.wsPath {path:?} {why}")))
    };
    if !path.starts_with('/') {
        return invalid("must start with '/'");
    }
    if RESERVED_PATHS.contains(&path) {
        return invalid("collides with a built-in route");
    }
    if path.contains(['{', '}']) {
        return invalid("must not contain '{' or '}'");
    }
    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return invalid("must not have segments starting with ':' or '*'");
    }
    Ok(())
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

/// Parse a string as an integer within an inclusive range.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = (self.lookup)(name)?;
        let result = parse_in_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.ranged(name, min, max)
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.ranged(name, min, max)
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.ranged(name, min, max)
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.ranged(name, min, max)
    }
}
