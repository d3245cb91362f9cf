//! # vigil-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** from [`VigilSettings::default()`]
//! 2. **User file** at `$VIGIL_HOME/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** `VIGIL_*` (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, vigil_home};
pub use types::*;
