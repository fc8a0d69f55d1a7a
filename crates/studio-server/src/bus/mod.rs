//! Shared publish/subscribe message bus.
//!
//! The relay talks to the bus only through [`MessageBus`]. Implementations:
//!
//! - [`InMemoryBus`]: process-local fan-out; one instance can be shared by
//!   several servers to simulate a multi-process deployment
//! - [`RedisBus`]: Redis pub/sub with separate publish and subscribe connections

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use self::memory::InMemoryBus;
pub use self::redis::RedisBus;

/// Stream of raw payloads received on one channel.
pub type BusStream = BoxStream<'static, String>;

/// Errors from the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the bus.
    #[error("bus connection failed: {0}")]
    Connection(String),
    /// A publish was not accepted.
    #[error("bus publish failed: {0}")]
    Publish(String),
    /// A subscription could not be opened.
    #[error("bus subscribe failed: {0}")]
    Subscribe(String),
    /// An envelope could not be serialized.
    #[error("envelope serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The bus has been shut down.
    #[error("bus closed")]
    Closed,
}

/// Publish/subscribe transport shared by every server process.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Send `payload` on `channel`. Fire-and-forget: success means the bus
    /// accepted the message, not that anyone received it.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    /// Open a subscription to `channel`.
    ///
    /// Every call opens its own inbound path; callers are expected to
    /// subscribe once and keep the stream.
    async fn subscribe(&self, channel: &str) -> Result<BusStream, BusError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
