//! Configuration entities as seen by the sync subsystem.
//!
//! The durable store owns these records; this crate only describes their
//! shape so change envelopes and resync snapshots can carry them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigEntryError;
use crate::ids::{ConfigId, UserId};

/// Classification of a configuration entry.
///
/// Wire names are lowercase; the uppercase names used by older clients are
/// accepted on input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    /// Settings applied to every rendered output.
    #[serde(alias = "GLOBAL")]
    Global,
    /// Placeholder content settings.
    #[serde(alias = "PLACEHOLDER")]
    Placeholder,
    /// Per-template settings; the only kind with named variants.
    #[serde(alias = "TEMPLATE")]
    Template,
}

impl ConfigKind {
    /// All kinds, in snapshot order.
    pub const ALL: [Self; 3] = [Self::Global, Self::Placeholder, Self::Template];

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Placeholder => "placeholder",
            Self::Template => "template",
        }
    }

    /// Whether entries of this kind are further split into named variants.
    pub fn has_variants(self) -> bool {
        matches!(self, Self::Template)
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKind {
    type Err = ConfigEntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigEntryError::UnknownKind(s.to_owned()))
    }
}

/// One stored configuration entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    /// Entry identifier.
    pub id: ConfigId,
    /// Classification used for topic routing.
    #[serde(alias = "type")]
    pub kind: ConfigKind,
    /// Named variant (template type) for kinds that have them.
    #[serde(default, alias = "templateType", skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque configuration payload.
    #[serde(default)]
    pub config: Value,
    /// Monotonic revision counter maintained by the store.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Soft-delete flag.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// User that created the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<UserId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl ConfigEntry {
    /// Create a fresh, active entry with an empty payload.
    pub fn new(id: impl Into<ConfigId>, kind: ConfigKind, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            variant: None,
            name: name.into(),
            description: None,
            config: Value::Object(serde_json::Map::new()),
            version: 1,
            is_active: true,
            created_by_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the variant.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Set the configuration payload.
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Check the kind/variant pairing.
    ///
    /// Only templates take a variant, and it is optional: a template without
    /// one is the default template of its kind.
    pub fn validate(&self) -> Result<(), ConfigEntryError> {
        match (self.kind.has_variants(), self.variant.as_deref()) {
            (false, Some(_)) => Err(ConfigEntryError::UnexpectedVariant(self.kind)),
            (true, Some(v)) if v.trim().is_empty() => Err(ConfigEntryError::BlankVariant(self.kind)),
            _ => Ok(()),
        }
    }

    /// Ordering used for resync snapshots: kind, then variant, then most
    /// recently updated first. Ties break on id so the order is total.
    pub fn snapshot_order(a: &Self, b: &Self) -> Ordering {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.variant.cmp(&b.variant))
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}
