//! # casino-settings
//!
//! Layered configuration for the casino client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`ClientSettings::default()`])
//! 2. **User file** at `~/.casino/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** (`CASINO_*`, highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, casino_home, deep_merge, load_settings, load_settings_from_path,
    settings_path, validate,
};
pub use types::*;
