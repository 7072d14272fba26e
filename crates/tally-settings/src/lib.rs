//! # tally-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TallySettings::default()`]
//! 2. **Settings file**: `~/.tally/settings.json` or an explicit path
//! 3. **Environment variables**: `TALLY_*` overrides
//!
//! ```no_run
//! let settings = tally_settings::load_settings().unwrap_or_default();
//! println!("ws port: {}", settings.server.ws_port);
//! ```

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    read_settings_file, settings_dir, settings_path,
};
pub use types::{ClientSettings, ServerSettings, TallySettings};
