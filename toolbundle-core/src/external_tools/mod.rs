//! External tool management for bundled converters.
//!
//! This module downloads, verifies and installs FFmpeg, Pandoc and LibreOffice
//! into a self-contained install root, and tracks what is installed there.
//!
//! # Architecture
//!
//! - `types`: Core types (ExternalToolId, Platform, ToolStatus, ToolDefinition, ToolDescriptor)
//! - `catalog`: Static tool definitions with download URL templates and release feeds
//! - `resolver`: (tool, platform) to download descriptor, latest-version lookup
//! - `downloader`: Resumable download with retry, progress and integrity checks
//! - `extractor`: Archive extraction (zip, tar.gz, tar.xz)
//! - `installer`: Staging, layout validation, atomic promotion and crash recovery
//! - `manifest`: JSON persistence for installed tool state
//! - `updates`: Installed-versus-latest comparison
//! - `manager`: High-level API composing the above
//!
//! # Example
//!
//! ```ignore
//! use toolbundle_core::external_tools::{ExternalToolManager, ExternalToolId, ProgressEvent};
//! use toolbundle_core::Settings;
//!
//! let manager = ExternalToolManager::new(Settings::default())?;
//!
//! let version = manager
//!     .install(ExternalToolId::Pandoc, &|event: ProgressEvent| {
//!         println!("{} {}: {}%", event.tool, event.stage, event.percent);
//!     })
//!     .await?;
//!
//! if let Some(path) = manager.executable_path(ExternalToolId::Pandoc).await {
//!     println!("Pandoc {} installed at: {}", version, path.display());
//! }
//! ```

pub mod catalog;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod installer;
pub mod manager;
pub mod manifest;
pub mod paths;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod types;
pub mod updates;
pub mod version;

// Re-export commonly used types
pub use catalog::{get_all_tool_definitions, get_tool_definition};
pub use downloader::Downloader;
pub use error::ToolError;
pub use installer::{recover_install_root, ArchiveInstaller, InstallReceipt, InstalledTool};
pub use manager::{ExternalToolManager, InstallState, ToolInfo};
pub use manifest::{InstalledToolInfo, ManifestStore, ToolsManifest};
pub use progress::{ProgressEvent, ProgressSink, ProgressStage};
pub use resolver::{CatalogResolver, PlatformResolver};
pub use retry::RetryPolicy;
pub use types::{
    ArchiveFormat, EntryPoints, ExternalToolId, Platform, PlatformDownload, ReleaseFeed,
    ToolDefinition, ToolDescriptor, ToolStatus,
};
pub use updates::UpdateStatus;
pub use version::{compare_versions, VersionComparison};
