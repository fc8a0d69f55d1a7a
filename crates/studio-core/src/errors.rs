//! Error types for the shared vocabulary.

use thiserror::Error;

use crate::config_entry::ConfigKind;

/// A topic string or topic component violates the topic grammar.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TopicError {
    /// The string does not start with the `studio` namespace.
    #[error("topic '{0}' is outside the studio namespace")]
    ForeignNamespace(String),
    /// The kind segment does not name a known configuration kind.
    #[error("topic '{0}' names an unknown configuration kind")]
    UnknownKind(String),
    /// A variant segment is empty or contains the separator.
    #[error("invalid topic variant '{0}'")]
    InvalidVariant(String),
    /// Too many or too few segments.
    #[error("malformed topic '{0}'")]
    Malformed(String),
}

/// A configuration entry is not well-formed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigEntryError {
    /// Unrecognized kind name.
    #[error("unknown configuration kind '{0}'")]
    UnknownKind(String),
    /// A variant was given but is blank.
    #[error("{0} variant must not be blank")]
    BlankVariant(ConfigKind),
    /// The kind has no variants but one was given.
    #[error("{0} entries do not take a variant")]
    UnexpectedVariant(ConfigKind),
}
