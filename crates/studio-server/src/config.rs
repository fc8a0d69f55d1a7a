//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use studio_settings::StudioSettings;

/// Configuration for the sync server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path of the `WebSocket` endpoint.
    pub ws_path: String,
    /// Maximum concurrent sessions in this process.
    pub max_connections: usize,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Per-session outbound queue depth.
    pub send_buffer_size: usize,
    /// Ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Close a connection after this many seconds without a Pong.
    pub pong_timeout_secs: u64,
    /// Allowed CORS origin, if any.
    pub cors_origin: Option<String>,
    /// Bus channel carrying change envelopes.
    pub bus_channel: String,
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &StudioSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            ws_path: server.ws_path.clone(),
            max_connections: server.max_connections,
            max_message_size: server.max_message_size,
            send_buffer_size: server.send_buffer_size,
            ping_interval_secs: server.ping_interval_secs,
            pong_timeout_secs: server.pong_timeout_secs,
            cors_origin: Some(server.cors_origin.clone()).filter(|o| !o.is_empty()),
            bus_channel: settings.bus.channel.clone(),
        }
    }

    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Pong timeout as a `Duration`.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws/studio".into(),
            max_connections: 100,
            max_message_size: 1024 * 1024,
            send_buffer_size: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            cors_origin: None,
            bus_channel: "studio:updates".into(),
        }
    }
}
