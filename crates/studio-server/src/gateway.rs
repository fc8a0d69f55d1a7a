//! Session gateway: handshake verification and session admission.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use studio_core::{ConnectionId, Topic};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::auth::{AuthError, Identity, TokenVerifier};
use crate::metrics::{HANDSHAKE_REJECTIONS_TOTAL, WS_CONNECTIONS_TOTAL};
use crate::protocol::ServerMessage;
use crate::registry::SubscriptionRegistry;
use crate::websocket::connection::Session;

/// Admits privileged sessions into the registry.
pub struct SessionGateway {
    verifier: TokenVerifier,
    registry: Arc<SubscriptionRegistry>,
}

impl SessionGateway {
    /// Create a gateway verifying with `verifier` and admitting into `registry`.
    pub fn new(verifier: TokenVerifier, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { verifier, registry }
    }

    /// Verify a handshake credential. Creates no state on either outcome.
    pub fn on_connect_attempt(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        self.verifier.verify(credential).inspect_err(|e| {
            counter!(HANDSHAKE_REJECTIONS_TOTAL, "reason" => e.code()).increment(1);
            warn!(code = e.code(), reason = %e, "handshake rejected");
        })
    }

    /// Create a session for a verified identity, register it, and join it
    /// to the privileged-audience topic.
    ///
    /// Returns the session and the `connected` acknowledgement to send first.
    pub fn accept(
        &self,
        identity: Identity,
        tx: mpsc::Sender<Arc<String>>,
    ) -> (Arc<Session>, ServerMessage) {
        let session = Arc::new(Session::new(ConnectionId::new(), identity, tx));
        self.registry.insert(Arc::clone(&session));
        let _ = self.registry.join(&session.id, Topic::global());

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        info!(
            conn_id = %session.id,
            user_id = %session.identity.user_id,
            "session accepted"
        );

        let connected = ServerMessage::Connected {
            server_time: Utc::now(),
            connection_id: session.id.clone(),
        };
        (session, connected)
    }

    /// Registry this gateway admits into.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}
