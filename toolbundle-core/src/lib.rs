//! Toolbundle Core Library
//!
//! This crate acquires the external converter tools an application bundles
//! with itself. It includes:
//!
//! - Platform-aware resolution of download descriptors from a static catalog
//! - Resumable, retrying downloads with SHA256 verification
//! - Staged archive extraction with atomic promotion into the install root
//! - A JSON manifest of installed tool versions
//! - Update checks against upstream release feeds
//! - Configuration management (install root, network policy)

pub mod config;
pub mod external_tools;

// Re-exports for convenience
pub use config::{default_install_root, Settings};

pub use external_tools::{
    ExternalToolId, ExternalToolManager, InstalledToolInfo, Platform, ProgressEvent, ProgressSink,
    ProgressStage, ToolDescriptor, ToolError, ToolStatus, UpdateStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn exports_are_accessible() {
        fn _check_types(
            _settings: &Settings,
            _manager: &ExternalToolManager,
            _entry: &InstalledToolInfo,
            _descriptor: &ToolDescriptor,
            _status: &UpdateStatus,
            _error: &ToolError,
            _sink: &dyn ProgressSink,
        ) {
        }
    }

    #[test]
    fn manager_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExternalToolManager>();
    }
}
