//! Applies the action routed for one inbound text frame.

use std::sync::Arc;

use tracing::debug;

use super::connection::Session;
use super::session::SessionContext;
use crate::dispatch::Action;

/// Route `text` through the message table and apply the result.
///
/// Registry changes and acknowledgements happen inline. A resync runs on its
/// own task so the snapshot read never blocks this session's inbound loop.
pub fn handle_text(text: &str, session: &Arc<Session>, ctx: &SessionContext) {
    match ctx.table.route(session, text) {
        Action::Join { topic, ack } => {
            let _ = ctx.registry.join(&session.id, topic);
            let _ = session.send_message(&ack);
        }
        Action::Leave(topic) => {
            let _ = ctx.registry.leave(&session.id, &topic);
        }
        Action::Resync => {
            let resync = Arc::clone(&ctx.resync);
            let session = Arc::clone(session);
            let _ = tokio::spawn(async move { resync.serve(&session).await });
        }
        Action::Ignore(reason) => {
            debug!(conn_id = %session.id, %reason, "client message ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, TokenVerifier};
    use crate::dispatch::MessageTable;
    use crate::gateway::SessionGateway;
    use crate::registry::SubscriptionRegistry;
    use crate::resync::ResyncService;
    use crate::store::InMemoryConfigStore;
    use std::time::Duration;
    use studio_core::{ConfigEntry, ConfigKind, Topic, UserId};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn context(store: Arc<InMemoryConfigStore>) -> SessionContext {
        let registry = Arc::new(SubscriptionRegistry::new());
        SessionContext {
            gateway: Arc::new(SessionGateway::new(
                TokenVerifier::new("s", "SUPERADMIN"),
                Arc::clone(&registry),
            )),
            registry,
            table: Arc::new(MessageTable::new()),
            resync: Arc::new(ResyncService::new(store)),
            send_buffer_size: 16,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            shutdown: CancellationToken::new(),
        }
    }

    fn accept(ctx: &SessionContext) -> (Arc<Session>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(16);
        let identity = Identity {
            user_id: UserId::from("u1"),
            role: "SUPERADMIN".into(),
        };
        let (session, _connected) = ctx.gateway.accept(identity, tx);
        (session, rx)
    }

    #[tokio::test]
    async fn subscribe_joins_and_acknowledges() {
        let ctx = context(Arc::new(InMemoryConfigStore::new()));
        let (session, mut rx) = accept(&ctx);

        handle_text(
            r#"{"type":"subscribe","data":{"kind":"template","variant":"url"}}"#,
            &session,
            &ctx,
        );

        let topic = Topic::variant(ConfigKind::Template, "url").unwrap();
        assert!(ctx.registry.is_subscribed(&session.id, &topic));
        let ack: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["data"]["topic"], "studio:template:url");
        assert_eq!(ack["data"]["variant"], "url");
    }

    #[tokio::test]
    async fn unsubscribe_leaves() {
        let ctx = context(Arc::new(InMemoryConfigStore::new()));
        let (session, _rx) = accept(&ctx);
        handle_text(r#"{"type":"subscribe","data":{"kind":"placeholder"}}"#, &session, &ctx);
        handle_text(r#"{"type":"unsubscribe","data":{"kind":"placeholder"}}"#, &session, &ctx);
        assert_eq!(ctx.registry.topics_of(&session.id), vec![Topic::global()]);
    }

    #[tokio::test]
    async fn request_sync_replies_with_snapshot() {
        let store = Arc::new(InMemoryConfigStore::new());
        for i in 0..3 {
            let _ = store
                .upsert(ConfigEntry::new(format!("g{i}"), ConfigKind::Global, "x"))
                .unwrap();
        }
        let ctx = context(store);
        let (session, mut rx) = accept(&ctx);

        handle_text(r#"{"type":"requestSync"}"#, &session, &ctx);

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let reply: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(reply["type"], "syncComplete");
        assert_eq!(reply["data"]["entries"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_message_changes_nothing() {
        let ctx = context(Arc::new(InMemoryConfigStore::new()));
        let (session, mut rx) = accept(&ctx);
        handle_text(r#"{"type":"dropTables"}"#, &session, &ctx);
        handle_text("garbage", &session, &ctx);
        assert_eq!(ctx.registry.topics_of(&session.id), vec![Topic::global()]);
        assert!(rx.try_recv().is_err());
    }
}
