//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! settings file only needs the keys it wants to change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParlorSettings {
    /// HTTP listener and routes.
    pub server: ServerSettings,
    /// Connection hub limits and deadlines.
    pub hub: HubSettings,
    /// Message/user database.
    pub store: StoreSettings,
    /// Credential hashing.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
    /// Directory served for every path not matched by another route.
    pub static_dir: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            static_dir: "./public".to_string(),
        }
    }
}

/// Per-connection limits for the broadcast hub.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Outbound frames buffered per connection before it counts as stalled.
    pub outbound_queue: usize,
    /// Deadline for a single frame write, in milliseconds.
    pub write_timeout_ms: u64,
    /// Idle read deadline, in milliseconds. Any inbound frame (pongs included) resets it.
    pub read_timeout_ms: u64,
    /// Ping interval, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_bytes: usize,
}

impl HubSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            write_timeout_ms: 10_000,
            read_timeout_ms: 90_000,
            heartbeat_interval_ms: 30_000,
            max_message_bytes: 64 * 1024,
        }
    }
}

/// Database location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite database file. `:memory:` keeps everything in process.
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "./users.db".to_string(),
        }
    }
}

/// Credential hashing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// bcrypt work factor (4..=31).
    pub bcrypt_cost: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { bcrypt_cost: 12 }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`). `RUST_LOG` wins.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `[["parlor_hub", "debug"]]`.
    pub module_levels: Vec<(String, String)>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let settings: ParlorSettings =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.hub.outbound_queue, 256);
    }

    #[test]
    fn camel_case_keys() {
        let value = serde_json::to_value(ParlorSettings::default()).unwrap();
        assert!(value["server"].get("wsPath").is_some());
        assert!(value["server"].get("staticDir").is_some());
        assert!(value["hub"].get("writeTimeoutMs").is_some());
        assert!(value["store"].get("dbPath").is_some());
        assert!(value["auth"].get("bcryptCost").is_some());
        assert!(value["logging"].get("moduleLevels").is_some());
    }

    #[test]
    fn hub_durations() {
        let hub = HubSettings {
            write_timeout_ms: 1500,
            read_timeout_ms: 2500,
            heartbeat_interval_ms: 500,
            ..HubSettings::default()
        };
        assert_eq!(hub.write_timeout(), Duration::from_millis(1500));
        assert_eq!(hub.read_timeout(), Duration::from_millis(2500));
        assert_eq!(hub.heartbeat_interval(), Duration::from_millis(500));
    }

    #[test]
    fn module_levels_decode_as_pairs() {
        let logging: LoggingSettings =
            serde_json::from_str(r#"{"moduleLevels": [["parlor_hub", "debug"]]}"#).unwrap();
        assert_eq!(
            logging.module_levels,
            vec![("parlor_hub".to_string(), "debug".to_string())]
        );
    }
}
