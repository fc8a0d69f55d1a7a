//! Authoritative in-process configuration store.
//!
//! Used for single-node and test deployments. Writes go through
//! [`upsert`](InMemoryConfigStore::upsert) / [`remove`](InMemoryConfigStore::remove);
//! callers notify the mutation publisher after the write returns.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use studio_core::{ChangeAction, ConfigEntry, ConfigEntryError, ConfigId};

use super::{ConfigReader, StoreError};

/// Configuration entries held in memory.
#[derive(Default)]
pub struct InMemoryConfigStore {
    entries: RwLock<HashMap<ConfigId, ConfigEntry>>,
}

impl InMemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    ///
    /// Replacing keeps the original creation time and bumps the version.
    /// Returns the action to announce and the stored entry.
    pub fn upsert(
        &self,
        mut entry: ConfigEntry,
    ) -> Result<(ChangeAction, ConfigEntry), ConfigEntryError> {
        entry.validate()?;
        let mut entries = self.entries.write();
        let action = match entries.get(&entry.id) {
            Some(existing) => {
                entry.created_at = existing.created_at;
                entry.version = existing.version.saturating_add(1);
                entry.updated_at = Utc::now();
                ChangeAction::Updated
            }
            None => ChangeAction::Created,
        };
        let _ = entries.insert(entry.id.clone(), entry.clone());
        Ok((action, entry))
    }

    /// Remove an entry, returning it if it existed.
    pub fn remove(&self, id: &ConfigId) -> Option<ConfigEntry> {
        self.entries.write().remove(id)
    }

    /// Look up one entry.
    pub fn get(&self, id: &ConfigId) -> Option<ConfigEntry> {
        self.entries.read().get(id).cloned()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ConfigReader for InMemoryConfigStore {
    async fn read_all(&self) -> Result<Vec<ConfigEntry>, StoreError> {
        Ok(self.entries.read().values().cloned().collect())
    }

    fn source(&self) -> &'static str {
        "memory"
    }
}
