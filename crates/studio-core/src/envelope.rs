//! Change envelopes: the unit published on the bus and delivered to clients.
//!
//! Every envelope carries enough of its subject (kind and variant) to compute
//! its target topics without a store lookup.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::config_entry::{ConfigEntry, ConfigKind};
use crate::ids::{ConfigId, UserId};
use crate::topic::Topic;

/// What happened to the subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// A new entry was stored.
    #[serde(alias = "create")]
    Created,
    /// An existing entry was modified.
    #[serde(alias = "update")]
    Updated,
    /// An entry was removed (or deactivated).
    #[serde(alias = "delete")]
    Deleted,
}

impl ChangeAction {
    /// Wire name of this action.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    /// Whether the subject of this action must be the full entity.
    /// Only deletions may travel as a bare reference.
    pub fn requires_entity(self) -> bool {
        !matches!(self, Self::Deleted)
    }
}

/// Minimal reference to a removed entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    /// Entry identifier.
    pub id: ConfigId,
    /// Classification of the removed entry.
    #[serde(alias = "type")]
    pub kind: ConfigKind,
    /// Variant of the removed entry, when known.
    #[serde(default, alias = "templateType", skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// The entity a change is about.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeSubject {
    /// Full entry after a create or update.
    Entity(Box<ConfigEntry>),
    /// Reference to a deleted entry.
    Reference(SubjectRef),
}

impl ChangeSubject {
    /// Identifier of the subject.
    pub fn id(&self) -> &ConfigId {
        match self {
            Self::Entity(entry) => &entry.id,
            Self::Reference(r) => &r.id,
        }
    }

    /// Kind of the subject.
    pub fn kind(&self) -> ConfigKind {
        match self {
            Self::Entity(entry) => entry.kind,
            Self::Reference(r) => r.kind,
        }
    }

    /// Variant of the subject, if any.
    pub fn variant(&self) -> Option<&str> {
        match self {
            Self::Entity(entry) => entry.variant.as_deref(),
            Self::Reference(r) => r.variant.as_deref(),
        }
    }

    /// Reduce the subject to a reference.
    pub fn to_ref(&self) -> SubjectRef {
        SubjectRef {
            id: self.id().clone(),
            kind: self.kind(),
            variant: self.variant().map(str::to_owned),
        }
    }
}

impl From<ConfigEntry> for ChangeSubject {
    fn from(entry: ConfigEntry) -> Self {
        Self::Entity(Box::new(entry))
    }
}

impl From<SubjectRef> for ChangeSubject {
    fn from(r: SubjectRef) -> Self {
        Self::Reference(r)
    }
}

/// One configuration change, as published on the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEnvelope {
    /// What happened.
    pub action: ChangeAction,
    /// What it happened to.
    #[serde(alias = "config")]
    pub subject: ChangeSubject,
    /// Who made the change. Clients use this to recognize their own edits.
    #[serde(alias = "userId")]
    pub actor_id: UserId,
    /// When the envelope was built. Display and ordering hint only.
    #[serde(alias = "timestamp")]
    pub emitted_at: DateTime<Utc>,
}

impl ChangeEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn new(
        action: ChangeAction,
        subject: impl Into<ChangeSubject>,
        actor_id: impl Into<UserId>,
    ) -> Self {
        Self {
            action,
            subject: subject.into(),
            actor_id: actor_id.into(),
            emitted_at: Utc::now(),
        }
    }

    /// Topics this envelope is delivered on.
    pub fn target_topics(&self) -> Vec<Topic> {
        Topic::targets(self.subject.kind(), self.subject.variant())
    }

    /// Serialize for the bus.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a bus payload.
    ///
    /// A create or update whose subject only parses as a reference is
    /// rejected: the entity was truncated or malformed in transit.
    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        let envelope: Self = serde_json::from_str(payload)?;
        if envelope.action.requires_entity()
            && matches!(envelope.subject, ChangeSubject::Reference(_))
        {
            return Err(serde_json::Error::custom(format!(
                "{} envelope for {} carries no entity",
                envelope.action.as_str(),
                envelope.subject.id()
            )));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn template(variant: &str) -> ConfigEntry {
        ConfigEntry::new("t1", ConfigKind::Template, "URL template").with_variant(variant)
    }

    #[test]
    fn entity_subject_survives_the_bus() {
        let env = ChangeEnvelope::new(ChangeAction::Updated, template("url"), "u1");
        let back = ChangeEnvelope::from_payload(&env.to_payload().unwrap()).unwrap();
        assert_eq!(back, env);
        assert_matches!(back.subject, ChangeSubject::Entity(_));
    }

    #[test]
    fn reference_subject_survives_the_bus() {
        let subject = SubjectRef {
            id: "p1".into(),
            kind: ConfigKind::Placeholder,
            variant: None,
        };
        let env = ChangeEnvelope::new(ChangeAction::Deleted, subject, "u2");
        let payload = env.to_payload().unwrap();
        let back = ChangeEnvelope::from_payload(&payload).unwrap();
        assert_matches!(back.subject, ChangeSubject::Reference(ref r) if r.id.as_str() == "p1");
        assert_eq!(back.action, ChangeAction::Deleted);
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let env = ChangeEnvelope::new(ChangeAction::Created, template("wifi"), "u1");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["action"], "created");
        assert_eq!(value["actorId"], "u1");
        assert_eq!(value["subject"]["kind"], "template");
        assert_eq!(value["subject"]["variant"], "wifi");
        assert!(value["emittedAt"].is_string());
    }

    #[test]
    fn decodes_config_keyed_delete_payload() {
        let payload = r#"{
            "action": "delete",
            "config": {"id": "c9", "type": "GLOBAL"},
            "userId": "admin",
            "timestamp": "2026-03-01T10:00:00.000Z"
        }"#;
        let env = ChangeEnvelope::from_payload(payload).unwrap();
        assert_eq!(env.action, ChangeAction::Deleted);
        assert_matches!(env.subject, ChangeSubject::Reference(_));
        assert_eq!(env.subject.kind(), ConfigKind::Global);
        assert_eq!(env.actor_id.as_str(), "admin");
    }

    #[test]
    fn decodes_config_keyed_update_payload() {
        let payload = r##"{
            "action": "update",
            "config": {
                "id": "t4",
                "type": "TEMPLATE",
                "templateType": null,
                "name": "Default template",
                "description": null,
                "config": {"color": "#fff"},
                "version": 3,
                "isActive": true,
                "createdById": "admin",
                "createdAt": "2026-02-01T09:00:00.000Z",
                "updatedAt": "2026-03-01T10:00:00.000Z"
            },
            "userId": "admin",
            "timestamp": "2026-03-01T10:00:00.000Z"
        }"##;
        let env = ChangeEnvelope::from_payload(payload).unwrap();
        assert_eq!(env.action, ChangeAction::Updated);
        assert_matches!(&env.subject, ChangeSubject::Entity(entry) if entry.version == 3);
        assert_eq!(env.subject.variant(), None);
        assert_eq!(
            env.target_topics(),
            vec![Topic::global(), Topic::kind(ConfigKind::Template)]
        );
    }

    #[test]
    fn truncated_entity_on_update_is_rejected() {
        // Missing name and timestamps: only the reference shape would match.
        let payload = r#"{
            "action": "updated",
            "subject": {"id": "t1", "kind": "template", "variant": "url"},
            "actorId": "u1",
            "emittedAt": "2026-03-01T10:00:00Z"
        }"#;
        let err = ChangeEnvelope::from_payload(payload).unwrap_err();
        assert!(err.to_string().contains("carries no entity"));
    }

    #[test]
    fn only_deletions_may_carry_a_reference() {
        assert!(ChangeAction::Created.requires_entity());
        assert!(ChangeAction::Updated.requires_entity());
        assert!(!ChangeAction::Deleted.requires_entity());
    }

    #[test]
    fn target_topics_follow_subject() {
        let env = ChangeEnvelope::new(ChangeAction::Updated, template("url"), "u1");
        let topics = env.target_topics();
        assert!(topics.contains(&Topic::global()));
        assert!(topics.contains(&Topic::kind(ConfigKind::Template)));
        assert!(topics.contains(&Topic::variant(ConfigKind::Template, "url").unwrap()));
        assert!(!topics.contains(&Topic::kind(ConfigKind::Placeholder)));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(ChangeEnvelope::from_payload("{not json").is_err());
        assert!(ChangeEnvelope::from_payload(r#"{"action":"exploded"}"#).is_err());
    }

    #[test]
    fn to_ref_keeps_routing_fields() {
        let subject = ChangeSubject::from(template("url"));
        let r = subject.to_ref();
        assert_eq!(r.kind, ConfigKind::Template);
        assert_eq!(r.variant.as_deref(), Some("url"));
    }
}
