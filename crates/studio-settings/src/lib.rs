//! # studio-settings
//!
//! Configuration for the studio sync server, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`StudioSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `STUDIO_*`, `JWT_SECRET`, `REDIS_URL`, `FRONTEND_URL`
//!
//! Settings are loaded once at process start and passed down explicitly;
//! there is no global settings instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path};
pub use types::*;
