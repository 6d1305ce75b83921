//! Configuration for the tool installer.
//!
//! Settings are loaded from an optional JSON file with environment overrides.

mod settings;

pub use settings::{default_install_root, Settings, DEFAULT_ALLOWED_HOSTS, ROOT_ENV_VAR};
