//! Broadcast topics.
//!
//! A topic is a plain string with a fixed grammar:
//!
//! ```text
//! studio:superadmin            every privileged session
//! studio:<kind>                every change of one configuration kind
//! studio:<kind>:<variant>      one variant of a kind
//! ```
//!
//! Topics are never stored; they exist as registry keys and are computed
//! deterministically from a configuration entity's classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config_entry::ConfigKind;
use crate::errors::TopicError;

/// Namespace prefix shared by every topic.
pub const NAMESPACE: &str = "studio";
/// Segment separator.
pub const SEPARATOR: char = ':';
/// Name of the privileged-audience segment.
const GLOBAL_SEGMENT: &str = "superadmin";

/// A named broadcast scope.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// The privileged-audience topic every session joins at connect time.
    pub fn global() -> Self {
        Self(format!("{NAMESPACE}{SEPARATOR}{GLOBAL_SEGMENT}"))
    }

    /// Topic receiving every change of `kind`, across all variants.
    pub fn kind(kind: ConfigKind) -> Self {
        Self(format!("{NAMESPACE}{SEPARATOR}{kind}"))
    }

    /// Topic receiving only changes of `kind` with the given variant.
    pub fn variant(kind: ConfigKind, variant: &str) -> Result<Self, TopicError> {
        validate_variant(variant)?;
        Ok(Self(format!("{NAMESPACE}{SEPARATOR}{kind}{SEPARATOR}{variant}")))
    }

    /// Topic a client joins when subscribing to a kind with an optional variant.
    pub fn subscription(kind: ConfigKind, variant: Option<&str>) -> Result<Self, TopicError> {
        match variant {
            Some(v) => Self::variant(kind, v),
            None => Ok(Self::kind(kind)),
        }
    }

    /// Every topic a change to an entity of `kind`/`variant` is delivered on:
    /// the global topic, the kind topic, and the variant topic when one applies.
    ///
    /// A variant that cannot form a valid topic is skipped rather than
    /// failing the whole fan-out.
    pub fn targets(kind: ConfigKind, variant: Option<&str>) -> Vec<Self> {
        let mut topics = vec![Self::global(), Self::kind(kind)];
        if let Some(topic) = variant.and_then(|v| Self::variant(kind, v).ok()) {
            topics.push(topic);
        }
        topics
    }

    /// Parse a topic reference sent by a client.
    ///
    /// Kind segments are matched case-insensitively and normalized.
    pub fn parse(s: &str) -> Result<Self, TopicError> {
        let mut parts = s.splitn(3, SEPARATOR);
        if parts.next() != Some(NAMESPACE) {
            return Err(TopicError::ForeignNamespace(s.to_owned()));
        }
        let Some(second) = parts.next() else {
            return Err(TopicError::Malformed(s.to_owned()));
        };
        let third = parts.next();

        if second == GLOBAL_SEGMENT {
            return match third {
                None => Ok(Self::global()),
                Some(_) => Err(TopicError::Malformed(s.to_owned())),
            };
        }

        let kind: ConfigKind = second
            .parse()
            .map_err(|_| TopicError::UnknownKind(s.to_owned()))?;
        Self::subscription(kind, third)
    }

    /// Whether this is the privileged-audience topic.
    pub fn is_global(&self) -> bool {
        *self == Self::global()
    }

    /// The topic string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_variant(variant: &str) -> Result<(), TopicError> {
    if variant.is_empty() || variant.contains(SEPARATOR) || variant.trim() != variant {
        return Err(TopicError::InvalidVariant(variant.to_owned()));
    }
    Ok(())
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}
