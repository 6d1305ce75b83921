//! Install-root path layout.
//!
//! Everything lives under one configured install root:
//!
//! - `{root}/manifest.json`: installed-version manifest
//! - `{root}/{tool}/`: final install directory per tool
//! - `{root}/.downloads/`: archives in transit (`*.part` while downloading)
//! - `{root}/.{tool}.staging-{pid}-*`: extraction staging, removed on exit
//!
//! Staging and backup directories are siblings of the final directory so the
//! promote step is a same-filesystem rename.

use std::path::{Path, PathBuf};

use super::types::{ExternalToolId, ToolDescriptor};

/// File name of the manifest under the install root.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Receipt written into every promoted install directory.
pub const RECEIPT_FILE_NAME: &str = ".toolbundle-receipt.json";

const DOWNLOADS_DIR_NAME: &str = ".downloads";

// ============================================================================
// Path Resolution
// ============================================================================

/// Returns the final install directory for a tool.
///
/// Path: `{root}/{tool}/`
pub fn tool_dir(root: &Path, tool: ExternalToolId) -> PathBuf {
    root.join(tool.as_str())
}

/// Returns the path to the manifest file.
///
/// Path: `{root}/manifest.json`
pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE_NAME)
}

/// Returns the directory holding downloaded archives.
pub fn downloads_dir(root: &Path) -> PathBuf {
    root.join(DOWNLOADS_DIR_NAME)
}

/// Returns the archive path for a descriptor.
///
/// Path: `{root}/.downloads/{tool}-{version}.{ext}`
pub fn archive_path(root: &Path, descriptor: &ToolDescriptor) -> PathBuf {
    let version: String = descriptor
        .version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    downloads_dir(root).join(format!(
        "{}-{}.{}",
        descriptor.tool,
        version,
        descriptor.archive_format.file_extension()
    ))
}

/// Returns the in-progress path for a download destination.
///
/// Path: `{dest}.part`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Name prefix shared by every staging directory of `tool`.
pub fn staging_name_prefix(tool: ExternalToolId) -> String {
    format!(".{}.staging-", tool)
}

/// Name prefix shared by every backup directory of `tool`.
pub fn backup_name_prefix(tool: ExternalToolId) -> String {
    format!(".{}.previous-", tool)
}

/// Name prefix for staging directories created by this process.
///
/// Includes the process id so concurrent processes never share a staging dir.
pub fn staging_prefix(tool: ExternalToolId) -> String {
    format!("{}{}-", staging_name_prefix(tool), std::process::id())
}

/// Returns a unique sibling path used to hold the previous install while the
/// new one is promoted.
pub fn backup_dir(root: &Path, tool: ExternalToolId) -> PathBuf {
    root.join(format!(
        "{}{}-{}",
        backup_name_prefix(tool),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ))
}

/// Process id embedded in a staging or backup directory name, given the
/// name with its prefix already stripped.
pub fn owner_pid(suffix: &str) -> Option<u32> {
    suffix.split('-').next()?.parse().ok()
}

/// Ensures the install root and downloads directory exist.
pub fn ensure_dirs_exist(root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(root)?;
    std::fs::create_dir_all(downloads_dir(root))?;
    Ok(())
}
