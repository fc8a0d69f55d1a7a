//! Cross-instance relay between the shared bus and local sessions.
//!
//! Every change reaches local sessions through [`CrossInstanceRelay::on_bus_message`],
//! including changes published by this same process. There is no local
//! short-circuit.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use metrics::counter;
use studio_core::ChangeEnvelope;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{BusError, BusStream, MessageBus};
use crate::metrics::{
    BUS_MESSAGES_MALFORMED_TOTAL, BUS_MESSAGES_RECEIVED_TOTAL, DELIVERIES_TOTAL,
    DELIVERY_DROPS_TOTAL,
};
use crate::protocol::ServerMessage;
use crate::registry::SubscriptionRegistry;

/// Bridges the bus channel and the local subscription registry.
pub struct CrossInstanceRelay {
    bus: Arc<dyn MessageBus>,
    registry: Arc<SubscriptionRegistry>,
    channel: String,
    started: AtomicBool,
}

impl CrossInstanceRelay {
    /// Create a relay for `channel`. Nothing is subscribed until [`start`](Self::start).
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<SubscriptionRegistry>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            registry,
            channel: channel.into(),
            started: AtomicBool::new(false),
        }
    }

    /// The bus channel this relay uses.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Open the single inbound subscription and spawn the delivery loop.
    ///
    /// Fails if the relay was already started or the subscription cannot be
    /// opened. The loop exits when `cancel` fires or the bus stream ends.
    pub async fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BusError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(BusError::Subscribe("relay already started".into()));
        }
        let stream = match self.bus.subscribe(&self.channel).await {
            Ok(s) => s,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };
        info!(channel = %self.channel, backend = self.bus.backend(), "relay subscribed");
        let relay = Arc::clone(self);
        Ok(tokio::spawn(async move { relay.run(stream, cancel).await }))
    }

    #[instrument(skip_all, fields(channel = %self.channel))]
    async fn run(&self, mut stream: BusStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("relay stopping");
                    break;
                }
                next = stream.next() => match next {
                    Some(raw) => {
                        let _ = self.on_bus_message(&raw);
                    }
                    None => {
                        error!("bus subscription ended, relay stopped");
                        break;
                    }
                },
            }
        }
    }

    /// Serialize `envelope` and send it on the channel.
    pub async fn publish(&self, envelope: &ChangeEnvelope) -> Result<(), BusError> {
        let payload = envelope.to_payload()?;
        self.bus.publish(&self.channel, payload).await
    }

    /// Handle one raw bus payload. Returns the number of sessions it was queued for.
    ///
    /// Malformed payloads are logged and dropped.
    pub fn on_bus_message(&self, raw: &str) -> usize {
        counter!(BUS_MESSAGES_RECEIVED_TOTAL).increment(1);
        match ChangeEnvelope::from_payload(raw) {
            Ok(envelope) => self.deliver(&envelope),
            Err(e) => {
                counter!(BUS_MESSAGES_MALFORMED_TOTAL).increment(1);
                warn!(error = %e, len = raw.len(), "malformed bus payload dropped");
                0
            }
        }
    }

    /// Fan `envelope` out to every local session on any of its target topics.
    ///
    /// A session on several target topics gets the envelope once.
    pub fn deliver(&self, envelope: &ChangeEnvelope) -> usize {
        let frame = match ServerMessage::ConfigChanged(envelope.clone()).to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize change for delivery");
                return 0;
            }
        };

        let mut seen = HashSet::new();
        let mut delivered = 0_usize;
        let mut dropped = 0_u64;
        for topic in envelope.target_topics() {
            for session in self.registry.subscribers(&topic) {
                if !seen.insert(session.id.clone()) {
                    continue;
                }
                if session.send(Arc::clone(&frame)) {
                    delivered += 1;
                } else if !session.is_closed() {
                    dropped += 1;
                }
            }
        }

        counter!(DELIVERIES_TOTAL).increment(delivered as u64);
        if dropped > 0 {
            counter!(DELIVERY_DROPS_TOTAL).increment(dropped);
        }
        debug!(
            action = envelope.action.as_str(),
            subject = %envelope.subject.id(),
            recipients = delivered,
            dropped,
            "change delivered"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::websocket::connection::Session;
    use crate::websocket::connection::test_support::session_for;
    use std::time::Duration;
    use studio_core::logging::capture_logs;
    use studio_core::{ChangeAction, ConfigEntry, ConfigKind, SubjectRef, Topic};
    use tokio::sync::mpsc;

    const CHANNEL: &str = "studio:updates";

    struct Fixture {
        bus: Arc<InMemoryBus>,
        registry: Arc<SubscriptionRegistry>,
        relay: Arc<CrossInstanceRelay>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(InMemoryBus::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let relay = Arc::new(CrossInstanceRelay::new(
            bus.clone(),
            registry.clone(),
            CHANNEL,
        ));
        Fixture { bus, registry, relay }
    }

    fn connect(
        registry: &SubscriptionRegistry,
        user: &str,
        topics: &[Topic],
    ) -> (Arc<Session>, mpsc::Receiver<Arc<String>>) {
        let (session, rx) = session_for(user, 16);
        registry.insert(Arc::clone(&session));
        let _ = registry.join(&session.id, Topic::global());
        for t in topics {
            let _ = registry.join(&session.id, t.clone());
        }
        (session, rx)
    }

    fn url_template_update() -> ChangeEnvelope {
        let entry = ConfigEntry::new("t1", ConfigKind::Template, "Landing").with_variant("url");
        ChangeEnvelope::new(ChangeAction::Updated, entry, "u1")
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn variant_change_reaches_variant_subscriber_once() {
        let f = fixture();
        let url = Topic::variant(ConfigKind::Template, "url").unwrap();
        let wifi = Topic::variant(ConfigKind::Template, "wifi").unwrap();
        let (_s1, mut rx1) = connect(&f.registry, "s1", &[url]);
        let (_s2, mut rx2) = connect(&f.registry, "s2", &[wifi]);

        let payload = url_template_update().to_payload().unwrap();
        let _ = f.relay.on_bus_message(&payload);

        let got = drain(&mut rx1);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "configChanged");
        assert_eq!(got[0]["data"]["action"], "updated");
        assert_eq!(got[0]["data"]["subject"]["id"], "t1");
        assert_eq!(got[0]["data"]["subject"]["kind"], "template");
        assert_eq!(got[0]["data"]["subject"]["variant"], "url");
        assert_eq!(got[0]["data"]["actorId"], "u1");

        // s2 is on the global topic, so it still hears about every change.
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[test]
    fn disjoint_kind_subscriber_outside_global_gets_nothing() {
        let f = fixture();
        let (session, mut rx) = session_for("s3", 16);
        f.registry.insert(Arc::clone(&session));
        let _ = f.registry.join(&session.id, Topic::kind(ConfigKind::Placeholder));

        assert_eq!(f.relay.on_bus_message(&url_template_update().to_payload().unwrap()), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn kind_subscriber_receives_all_variants() {
        let f = fixture();
        let (session, mut rx) = session_for("s1", 16);
        f.registry.insert(Arc::clone(&session));
        let _ = f.registry.join(&session.id, Topic::kind(ConfigKind::Template));

        let _ = f.relay.deliver(&url_template_update());
        let wifi = ConfigEntry::new("t2", ConfigKind::Template, "Guest").with_variant("wifi");
        let _ = f.relay.deliver(&ChangeEnvelope::new(ChangeAction::Created, wifi, "u1"));
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn delete_reference_routes_by_variant() {
        let f = fixture();
        let (session, mut rx) = session_for("s1", 16);
        f.registry.insert(Arc::clone(&session));
        let _ = f
            .registry
            .join(&session.id, Topic::variant(ConfigKind::Template, "url").unwrap());

        let envelope = ChangeEnvelope::new(
            ChangeAction::Deleted,
            SubjectRef {
                id: "t1".into(),
                kind: ConfigKind::Template,
                variant: Some("url".into()),
            },
            "u1",
        );
        assert_eq!(f.relay.deliver(&envelope), 1);
        assert_eq!(drain(&mut rx)[0]["data"]["action"], "deleted");
    }

    #[test]
    fn malformed_payload_is_logged_and_dropped() {
        let (logs, _guard) = capture_logs();
        let f = fixture();
        let (_s, mut rx) = connect(&f.registry, "s1", &[]);

        assert_eq!(f.relay.on_bus_message("{not json"), 0);
        assert_eq!(f.relay.on_bus_message(r#"{"action":"exploded"}"#), 0);
        assert!(drain(&mut rx).is_empty());
        assert!(logs.has_event(tracing::Level::WARN, "malformed bus payload dropped"));

        // A good payload afterwards is still delivered.
        assert_eq!(f.relay.on_bus_message(&url_template_update().to_payload().unwrap()), 1);
    }

    #[test]
    fn disconnected_session_is_a_no_op() {
        let f = fixture();
        let (_s, rx) = connect(&f.registry, "gone", &[]);
        drop(rx);
        let (_live, mut live_rx) = connect(&f.registry, "live", &[]);

        assert_eq!(f.relay.deliver(&url_template_update()), 1);
        assert_eq!(drain(&mut live_rx).len(), 1);
    }

    #[tokio::test]
    async fn published_envelope_round_trips_through_the_bus() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let handle = f.relay.start(cancel.clone()).await.unwrap();
        assert_eq!(f.bus.subscriber_count(CHANNEL), 1);
        let (_s, mut rx) = connect(&f.registry, "s1", &[]);

        let envelope = url_template_update();
        f.relay.publish(&envelope).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let msg: ServerMessage = serde_json::from_str(&frame).unwrap();
        assert_eq!(msg, ServerMessage::ConfigChanged(envelope));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn start_twice_is_refused() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let _handle = f.relay.start(cancel.clone()).await.unwrap();
        assert!(f.relay.start(cancel.clone()).await.is_err());
        assert_eq!(f.bus.subscriber_count(CHANNEL), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn two_relays_on_one_bus_both_deliver() {
        let bus = Arc::new(InMemoryBus::new());
        let reg_a = Arc::new(SubscriptionRegistry::new());
        let reg_b = Arc::new(SubscriptionRegistry::new());
        let relay_a = Arc::new(CrossInstanceRelay::new(bus.clone(), reg_a.clone(), CHANNEL));
        let relay_b = Arc::new(CrossInstanceRelay::new(bus.clone(), reg_b.clone(), CHANNEL));
        let cancel = CancellationToken::new();
        let _a = relay_a.start(cancel.clone()).await.unwrap();
        let _b = relay_b.start(cancel.clone()).await.unwrap();

        let (_sa, mut rx_a) = connect(&reg_a, "on-a", &[]);
        let (_sb, mut rx_b) = connect(&reg_b, "on-b", &[]);

        relay_a.publish(&url_template_update()).await.unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(frame.contains("configChanged"));
        }
        cancel.cancel();
    }
}
