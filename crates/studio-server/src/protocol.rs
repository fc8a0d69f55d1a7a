//! Wire messages exchanged over the `WebSocket`.
//!
//! Every frame is a JSON object `{"type": <name>, "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use studio_core::{ChangeEnvelope, ConfigEntry, ConfigKind, ConnectionId, Topic};

/// Generic reason sent when a snapshot cannot be read.
pub const SYNC_ERROR_MESSAGE: &str = "Error syncing configurations";

/// Server-to-client messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake accepted.
    Connected {
        /// Server clock at accept time, for display.
        server_time: DateTime<Utc>,
        /// Process-local handle of the new session.
        connection_id: ConnectionId,
    },
    /// A subscribe request was applied.
    Subscribed {
        /// Topic joined.
        topic: Topic,
        /// Kind subscribed to.
        kind: ConfigKind,
        /// Variant subscribed to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<String>,
    },
    /// A configuration change relayed from the bus.
    ConfigChanged(ChangeEnvelope),
    /// Full snapshot in answer to a resync request.
    SyncComplete {
        /// Every current entry, ordered.
        entries: Vec<ConfigEntry>,
    },
    /// The snapshot could not be read; the client should retry.
    SyncError {
        /// Human-readable, non-internal reason.
        message: String,
    },
}

impl ServerMessage {
    /// Wire name of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::ConfigChanged(_) => "configChanged",
            Self::SyncComplete { .. } => "syncComplete",
            Self::SyncError { .. } => "syncError",
        }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A client-to-server frame before routing.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientFrame {
    /// Message name used to pick a handler.
    #[serde(rename = "type", alias = "event")]
    pub message_type: String,
    /// Handler-specific payload.
    #[serde(default)]
    pub data: Option<Value>,
}

/// Payload of `subscribe`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    /// Kind to follow.
    #[serde(alias = "type")]
    pub kind: ConfigKind,
    /// Restrict to one variant of the kind.
    #[serde(default, alias = "templateType")]
    pub variant: Option<String>,
}

/// Payload of `unsubscribe`: either a topic string or a kind/variant pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeParams {
    /// Topic string as returned in `subscribed`.
    #[serde(default)]
    pub topic: Option<String>,
    /// Kind to stop following.
    #[serde(default, alias = "type")]
    pub kind: Option<ConfigKind>,
    /// Variant to stop following.
    #[serde(default, alias = "templateType")]
    pub variant: Option<String>,
}
