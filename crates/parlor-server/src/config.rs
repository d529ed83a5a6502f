//! Server configuration.

use std::path::PathBuf;

use parlor_hub::HubConfig;
use parlor_settings::ParlorSettings;

/// Configuration for the chat server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
    /// Directory served for unmatched routes. `None` disables static files.
    pub static_dir: Option<PathBuf>,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_bytes: usize,
    pub hub: HubConfig,
}

impl ServerConfig {
    pub fn from_settings(settings: &ParlorSettings) -> Self {
        let hub = &settings.hub;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            ws_path: settings.server.ws_path.clone(),
            static_dir: Some(PathBuf::from(&settings.server.static_dir)),
            max_message_bytes: hub.max_message_bytes,
            hub: HubConfig {
                outbound_queue: hub.outbound_queue,
                write_timeout: hub.write_timeout(),
                read_timeout: hub.read_timeout(),
                heartbeat_interval: hub.heartbeat_interval(),
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            static_dir: None,
            max_message_bytes: 64 * 1024,
            hub: HubConfig::default(),
        }
    }
}
