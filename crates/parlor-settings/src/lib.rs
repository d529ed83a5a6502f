//! # parlor-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParlorSettings::default()`]
//! 2. **Settings file**: `~/.parlor/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `PARLOR_*` overrides (highest priority)
//!
//! The binary applies command-line flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = ParlorSettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.ws_path, "/ws");
        assert_eq!(settings.server.static_dir, "./public");
        assert_eq!(settings.hub.outbound_queue, 256);
        assert_eq!(settings.hub.write_timeout_ms, 10_000);
        assert_eq!(settings.hub.read_timeout_ms, 90_000);
        assert_eq!(settings.hub.heartbeat_interval_ms, 30_000);
        assert_eq!(settings.store.db_path, "./users.db");
        assert_eq!(settings.auth.bcrypt_cost, 12);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn deep_merge_re_exported() {
        let a = serde_json::json!({"x": 1});
        let b = serde_json::json!({"y": 2});
        let merged = deep_merge(a, b);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
