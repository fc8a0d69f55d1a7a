//! Store-first bulk read with a cache fallback.
//!
//! The cache is filled lazily per key, so a non-empty cache may still be
//! missing entries. Snapshots therefore read the authoritative store and
//! only serve the cache while the store is unreachable.

use std::sync::Arc;

use async_trait::async_trait;
use studio_core::ConfigEntry;
use tracing::warn;

use super::{ConfigReader, StoreError};

/// Reads from `store`, falling back to `cache` when the store fails.
pub struct FallbackReader {
    cache: Arc<dyn ConfigReader>,
    store: Arc<dyn ConfigReader>,
}

impl FallbackReader {
    /// Compose a cache and its authoritative store.
    pub fn new(cache: Arc<dyn ConfigReader>, store: Arc<dyn ConfigReader>) -> Self {
        Self { cache, store }
    }
}

#[async_trait]
impl ConfigReader for FallbackReader {
    async fn read_all(&self) -> Result<Vec<ConfigEntry>, StoreError> {
        let store_err = match self.store.read_all().await {
            Ok(entries) => return Ok(entries),
            Err(e) => e,
        };
        warn!(store = self.store.source(), error = %store_err, "store read failed, trying cache");

        // Degraded mode: possibly partial, but better than nothing.
        match self.cache.read_all().await {
            Ok(entries) if !entries.is_empty() => {
                warn!(
                    cache = self.cache.source(),
                    entries = entries.len(),
                    "serving snapshot from cache"
                );
                Ok(entries)
            }
            Ok(_) => Err(store_err),
            Err(e) => {
                warn!(cache = self.cache.source(), error = %e, "cache read failed");
                Err(store_err)
            }
        }
    }

    fn source(&self) -> &'static str {
        "store+cache"
    }
}
