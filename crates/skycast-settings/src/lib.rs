//! # skycast-settings
//!
//! Configuration for the skycast server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SkycastSettings::default()`]
//! 2. **Settings file**: `~/.skycast/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `SKYCAST_*` overrides (highest priority)
//!
//! There is no process-global settings instance: the binary loads once and
//! hands the values to the components it builds.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
