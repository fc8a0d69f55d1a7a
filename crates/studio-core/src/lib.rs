//! # studio-core
//!
//! Shared vocabulary for the studio configuration sync subsystem.
//!
//! - **Branded IDs**: `ConnectionId`, `UserId`, `ConfigId` as newtypes for type safety
//! - **Configuration entities**: [`ConfigEntry`] and its [`ConfigKind`] classification
//! - **Topics**: [`Topic`] broadcast scopes computed from an entity's kind/variant
//! - **Change envelopes**: [`ChangeEnvelope`], the unit published on the bus
//! - **Errors**: [`TopicError`] and friends via `thiserror`
//! - **Logging**: `tracing` subscriber bootstrap and log capture for tests

#![deny(unsafe_code)]

pub mod config_entry;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod topic;

pub use config_entry::{ConfigEntry, ConfigKind};
pub use envelope::{ChangeAction, ChangeEnvelope, ChangeSubject, SubjectRef};
pub use errors::{ConfigEntryError, TopicError};
pub use ids::{ConfigId, ConnectionId, UserId};
pub use topic::Topic;
