//! Settings types.
//!
//! Every section deserializes with `#[serde(default)]`, so a settings file
//! only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use studio_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudioSettings {
    /// Network and WebSocket transport settings.
    pub server: ServerSettings,
    /// Handshake credential verification.
    pub auth: AuthSettings,
    /// Shared message bus.
    pub bus: BusSettings,
    /// Configuration store read path.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl StudioSettings {
    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret must be set (or JWT_SECRET)".into(),
            ));
        }
        if self.auth.privileged_role.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.privilegedRole must not be empty".into(),
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/': {}",
                self.server.ws_path
            )));
        }
        if self.server.send_buffer_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendBufferSize must be positive".into(),
            ));
        }
        if self.bus.channel.is_empty() {
            return Err(SettingsError::InvalidValue("bus.channel must not be empty".into()));
        }
        Ok(())
    }
}

/// Server network and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
    /// Maximum concurrent sessions per process.
    pub max_connections: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-session outbound queue depth.
    pub send_buffer_size: usize,
    /// Interval between server Ping frames.
    pub ping_interval_secs: u64,
    /// Close a connection after this long without a Pong.
    pub pong_timeout_secs: u64,
    /// Allowed CORS origin for the HTTP surface.
    pub cors_origin: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            ws_path: "/ws/studio".to_string(),
            max_connections: 100,
            max_message_size: 1024 * 1024,
            send_buffer_size: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

/// Handshake credential verification settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret shared with the issuing auth service.
    pub jwt_secret: String,
    /// The single role allowed to hold a session.
    pub privileged_role: String,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
    /// Required `iss` claim, if the issuer sets one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            privileged_role: "SUPERADMIN".to_string(),
            leeway_secs: 0,
            issuer: None,
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("privileged_role", &self.privileged_role)
            .field("leeway_secs", &self.leeway_secs)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// Which message bus implementation to run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// Redis pub/sub, shared by every process.
    #[default]
    Redis,
    /// In-process bus; only valid for a single instance.
    Memory,
}

/// Shared message bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Bus implementation.
    pub backend: BusBackend,
    /// Redis connection URL.
    pub url: String,
    /// Well-known change channel.
    pub channel: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: BusBackend::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
            channel: "studio:updates".to_string(),
        }
    }
}

/// Read-path settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Key prefix of cached configuration entries.
    pub cache_prefix: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cache_prefix: "studio:config:".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
