//! Redis pub/sub bus.
//!
//! Publishing goes through one multiplexed connection opened at connect
//! time. Every subscription opens its own dedicated pub/sub connection, so
//! inbound delivery never queues behind outbound publishes.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{info, warn};

use super::{BusError, BusStream, MessageBus};

/// Message bus backed by Redis pub/sub.
pub struct RedisBus {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Connect to `url` and open the publish connection.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        info!(url = %redact(url), "connected to redis bus");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.publisher.clone();
        let _receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusStream, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        info!(channel, "subscribed to redis channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(channel = msg.get_channel_name(), error = %e, "non-text bus payload dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Strip credentials from a Redis URL before logging it.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_owned(),
    }
}
