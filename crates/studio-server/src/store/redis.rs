//! Redis-backed configuration cache reader.
//!
//! The surrounding application caches each entry as a JSON string under
//! `<prefix><id>`. A read lists the prefix and fetches every value in one
//! `MGET`.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use studio_core::ConfigEntry;
use tracing::debug;

use super::{ConfigReader, StoreError};

/// Reads cached configuration entries from Redis.
pub struct RedisConfigCache {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisConfigCache {
    /// Connect to `url`, reading keys under `prefix`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    /// Key prefix this cache reads.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl ConfigReader for RedisConfigCache {
    async fn read_all(&self) -> Result<Vec<ConfigEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", self.prefix))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!(keys = keys.len(), "read configuration cache");

        decode_entries(keys.into_iter().zip(values))
    }

    fn source(&self) -> &'static str {
        "redis-cache"
    }
}

/// Decode cached values. Keys that vanished between `KEYS` and `MGET` are skipped.
fn decode_entries(
    pairs: impl IntoIterator<Item = (String, Option<String>)>,
) -> Result<Vec<ConfigEntry>, StoreError> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .map(|(key, value)| {
            serde_json::from_str::<ConfigEntry>(&value).map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })
        })
        .collect()
}
