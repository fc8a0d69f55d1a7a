//! On-demand full snapshot for a single session.

use std::sync::Arc;

use metrics::counter;
use studio_core::ConfigEntry;
use tracing::{error, info, warn};

use crate::metrics::{RESYNC_ERRORS_TOTAL, RESYNC_REQUESTS_TOTAL};
use crate::protocol::{SYNC_ERROR_MESSAGE, ServerMessage};
use crate::store::ConfigReader;
use crate::websocket::connection::Session;

/// Answers `requestSync` from the read path.
pub struct ResyncService {
    reader: Arc<dyn ConfigReader>,
}

impl ResyncService {
    /// Create a service reading through `reader`.
    pub fn new(reader: Arc<dyn ConfigReader>) -> Self {
        Self { reader }
    }

    /// Build the reply to a resync request: `syncComplete` with every
    /// entry in snapshot order, or `syncError` with a generic reason.
    pub async fn snapshot(&self) -> ServerMessage {
        counter!(RESYNC_REQUESTS_TOTAL).increment(1);
        match self.reader.read_all().await {
            Ok(mut entries) => {
                entries.sort_by(ConfigEntry::snapshot_order);
                ServerMessage::SyncComplete { entries }
            }
            Err(e) => {
                counter!(RESYNC_ERRORS_TOTAL).increment(1);
                error!(source = self.reader.source(), error = %e, "snapshot read failed");
                ServerMessage::SyncError {
                    message: SYNC_ERROR_MESSAGE.into(),
                }
            }
        }
    }

    /// Read the snapshot and send it to `session` only.
    ///
    /// The reply waits for queue space rather than being dropped, so a
    /// client that asked for a resync always hears back while connected.
    pub async fn serve(&self, session: &Session) {
        let reply = self.snapshot().await;
        if !session.send_message_async(&reply).await {
            warn!(conn_id = %session.id, "resync reply not delivered, connection closed");
            return;
        }
        if let ServerMessage::SyncComplete { entries } = &reply {
            info!(conn_id = %session.id, entries = entries.len(), "resync served");
        }
    }
}
