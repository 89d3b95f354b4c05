//! dms-config
//!
//! Startup configuration for the switch:
//! - layered YAML files, deep-merged in order, then CLI overrides on top;
//! - credentials only ever referenced by environment variable NAME;
//! - validation into [`Settings`] (failures are `SwitchError::ConfigInvalid`);
//! - one-time secret acquisition from a file or from stdin.

mod layered;
mod secret;
mod settings;

pub use layered::{load_layered_yaml, load_layered_yaml_from_strings, overlay, LoadedConfig};
pub use secret::{read_secret, read_secret_file, SECRET_SENTINEL};
pub use settings::*;
