//! Read path for configuration snapshots.
//!
//! The durable store and its cache belong to the surrounding application;
//! this subsystem only needs a bulk read of every current entry.

pub mod fallback;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use studio_core::ConfigEntry;
use thiserror::Error;

pub use self::fallback::FallbackReader;
pub use self::memory::InMemoryConfigStore;
pub use self::redis::RedisConfigCache;

/// Read-path failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored entry could not be decoded.
    #[error("corrupt entry {key}: {reason}")]
    Corrupt {
        /// Key of the unreadable entry.
        key: String,
        /// Decoder message.
        reason: String,
    },
}

/// Bulk read of the current configuration.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigReader: Send + Sync {
    /// Every currently stored entry, in no particular order.
    async fn read_all(&self) -> Result<Vec<ConfigEntry>, StoreError>;

    /// Short name for logs.
    fn source(&self) -> &'static str;
}
