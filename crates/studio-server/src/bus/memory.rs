//! In-process bus built on `tokio::sync::broadcast`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use super::{BusError, BusStream, MessageBus};

/// Default per-channel buffer.
const DEFAULT_CAPACITY: usize = 1024;

/// A bus whose channels live in this process.
///
/// Share one instance (behind an `Arc`) between server instances to model a
/// multi-process deployment in tests.
pub struct InMemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl InMemoryBus {
    /// Create a bus with the default per-channel buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` messages per channel.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of open subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Close every channel. Open subscriptions end; further calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.channels.lock().clear();
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        self.ensure_open()?;
        // No receivers is not an error at the bus level.
        let receivers = self.sender(channel).send(payload).unwrap_or(0);
        debug!(channel, receivers, "published on in-memory bus");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusStream, BusError> {
        self.ensure_open()?;
        let channel_name = channel.to_owned();
        let stream = BroadcastStream::new(self.sender(channel).subscribe()).filter_map(
            move |item| {
                let channel_name = channel_name.clone();
                async move {
                    match item {
                        Ok(payload) => Some(payload),
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!(channel = %channel_name, skipped, "bus subscriber lagged, messages lost");
                            None
                        }
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
