//! Entry point for the external mutation path.
//!
//! Call [`MutationPublisher::notify_change`] after the write commits and
//! after any cached copy of the entry has been invalidated, so sessions that
//! re-read on notification never see stale cache data.

use std::sync::Arc;

use metrics::counter;
use studio_core::{ChangeAction, ChangeEnvelope, ChangeSubject, UserId};
use thiserror::Error;
use tracing::{error, info};

use crate::bus::BusError;
use crate::metrics::{PUBLISH_FAILURES_TOTAL, PUBLISH_TOTAL};
use crate::relay::CrossInstanceRelay;

/// Why a change notification was not published.
///
/// The underlying write has already succeeded; callers should report the
/// change as saved with live sync possibly delayed.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A create or update was given a bare reference instead of the entity.
    #[error("{} change needs the full entity, got a reference", .0.as_str())]
    ReferenceSubject(ChangeAction),
    /// The bus refused or could not serialize the envelope.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Turns committed mutations into bus envelopes.
pub struct MutationPublisher {
    relay: Arc<CrossInstanceRelay>,
}

impl MutationPublisher {
    /// Create a publisher sending through `relay`.
    pub fn new(relay: Arc<CrossInstanceRelay>) -> Self {
        Self { relay }
    }

    /// Build an envelope and publish it once. Never retries.
    ///
    /// Entities without a variant are published as-is and reach the global
    /// and kind topics only.
    pub async fn notify_change(
        &self,
        action: ChangeAction,
        subject: impl Into<ChangeSubject>,
        actor_id: impl Into<UserId>,
    ) -> Result<ChangeEnvelope, PublishError> {
        let subject: ChangeSubject = subject.into();
        if action.requires_entity() && matches!(subject, ChangeSubject::Reference(_)) {
            return Err(PublishError::ReferenceSubject(action));
        }
        let envelope = ChangeEnvelope::new(action, subject, actor_id);

        match self.relay.publish(&envelope).await {
            Ok(()) => {
                counter!(PUBLISH_TOTAL, "action" => action.as_str()).increment(1);
                info!(
                    action = action.as_str(),
                    subject = %envelope.subject.id(),
                    actor_id = %envelope.actor_id,
                    "change published"
                );
                Ok(envelope)
            }
            Err(e) => {
                counter!(PUBLISH_FAILURES_TOTAL).increment(1);
                error!(
                    action = action.as_str(),
                    subject = %envelope.subject.id(),
                    error = %e,
                    "change publish failed"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusStream, InMemoryBus, MessageBus};
    use crate::registry::SubscriptionRegistry;
    use crate::websocket::connection::test_support::session_for;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use futures::StreamExt;
    use studio_core::{ConfigEntry, ConfigKind, SubjectRef, Topic};

    const CHANNEL: &str = "studio:updates";

    struct DownBus;

    #[async_trait]
    impl MessageBus for DownBus {
        async fn publish(&self, _channel: &str, _payload: String) -> Result<(), BusError> {
            Err(BusError::Publish("connection reset".into()))
        }
        async fn subscribe(&self, _channel: &str) -> Result<BusStream, BusError> {
            Err(BusError::Subscribe("connection reset".into()))
        }
        fn backend(&self) -> &'static str {
            "down"
        }
    }

    fn publisher_on(bus: Arc<dyn MessageBus>) -> MutationPublisher {
        let relay = CrossInstanceRelay::new(bus, Arc::new(SubscriptionRegistry::new()), CHANNEL);
        MutationPublisher::new(Arc::new(relay))
    }

    #[tokio::test]
    async fn envelope_lands_on_the_channel() {
        let bus = Arc::new(InMemoryBus::new());
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();
        let publisher = publisher_on(bus);

        let entry = ConfigEntry::new("t1", ConfigKind::Template, "Landing").with_variant("url");
        let envelope = publisher
            .notify_change(ChangeAction::Updated, entry, "u1")
            .await
            .unwrap();

        let raw = sub.next().await.unwrap();
        assert_eq!(ChangeEnvelope::from_payload(&raw).unwrap(), envelope);
        assert_eq!(envelope.actor_id.as_str(), "u1");
    }

    #[tokio::test]
    async fn delete_reference_is_published() {
        let bus = Arc::new(InMemoryBus::new());
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();
        let publisher = publisher_on(bus);
        let subject = SubjectRef {
            id: "p1".into(),
            kind: ConfigKind::Placeholder,
            variant: None,
        };
        let _ = publisher
            .notify_change(ChangeAction::Deleted, subject, "u1")
            .await
            .unwrap();
        let raw = sub.next().await.unwrap();
        assert!(raw.contains("\"deleted\""));
    }

    #[tokio::test]
    async fn bus_failure_is_reported_to_the_caller() {
        let publisher = publisher_on(Arc::new(DownBus));
        let entry = ConfigEntry::new("g1", ConfigKind::Global, "Brand");
        let result = publisher.notify_change(ChangeAction::Created, entry, "u1").await;
        assert_matches!(result, Err(PublishError::Bus(BusError::Publish(_))));
    }

    #[tokio::test]
    async fn variantless_template_reaches_kind_subscribers() {
        let bus = Arc::new(InMemoryBus::new());
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();
        let registry = Arc::new(SubscriptionRegistry::new());
        let relay = Arc::new(CrossInstanceRelay::new(bus, Arc::clone(&registry), CHANNEL));
        let publisher = MutationPublisher::new(Arc::clone(&relay));

        let (session, mut rx) = session_for("viewer", 4);
        registry.insert(Arc::clone(&session));
        let _ = registry.join(&session.id, Topic::kind(ConfigKind::Template));

        let entry = ConfigEntry::new("t9", ConfigKind::Template, "Default template");
        let envelope = publisher
            .notify_change(ChangeAction::Created, entry, "u1")
            .await
            .unwrap();
        assert_eq!(envelope.target_topics(), vec![Topic::global(), Topic::kind(ConfigKind::Template)]);

        let raw = sub.next().await.unwrap();
        assert_eq!(relay.on_bus_message(&raw), 1);
        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["data"]["subject"]["id"], "t9");
    }

    #[tokio::test]
    async fn update_with_bare_reference_is_refused() {
        let bus = Arc::new(InMemoryBus::new());
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();
        let publisher = publisher_on(bus);
        let subject = SubjectRef {
            id: "t1".into(),
            kind: ConfigKind::Template,
            variant: Some("url".into()),
        };
        let result = publisher.notify_change(ChangeAction::Updated, subject, "u1").await;
        assert_matches!(result, Err(PublishError::ReferenceSubject(ChangeAction::Updated)));
        let nothing = tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await;
        assert!(nothing.is_err());
    }
}
