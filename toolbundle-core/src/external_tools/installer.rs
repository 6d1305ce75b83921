//! Staged installation of a downloaded archive.
//!
//! The archive is unpacked into a fresh staging directory next to the final
//! install directory, validated, stamped with a receipt and then promoted by
//! rename. The staging directory is a [`tempfile::TempDir`], so every early
//! return (including cancellation) removes it, and the final directory is
//! never touched before the promote step.
//!
//! [`recover_install_root`] repairs what a killed process can leave behind
//! around the promote step.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ToolError;
use super::extractor::{extract_archive, make_executable};
use super::paths::{
    backup_dir, backup_name_prefix, owner_pid, staging_name_prefix, staging_prefix, tool_dir,
    RECEIPT_FILE_NAME,
};
use super::progress::{ProgressSink, ProgressStage, StageReporter};
use super::types::{ArchiveFormat, ExternalToolId, ToolDescriptor};
use crate::config::Settings;

/// Marker written into every promoted install directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub tool: ExternalToolId,
    pub version: String,
    pub installed_at: DateTime<Utc>,
}

/// Reads the receipt of an install directory, if it has a valid one.
pub fn read_receipt(dir: &Path) -> Option<InstallReceipt> {
    let content = fs::read_to_string(dir.join(RECEIPT_FILE_NAME)).ok()?;
    serde_json::from_str(&content).ok()
}

fn write_receipt(dir: &Path, receipt: &InstallReceipt) -> Result<(), ToolError> {
    let content = serde_json::to_string_pretty(receipt)
        .map_err(|e| ToolError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    fs::write(dir.join(RECEIPT_FILE_NAME), content)?;
    Ok(())
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTool {
    pub path: PathBuf,
    /// Version now on disk, as written to the receipt.
    pub version: String,
}

/// Extracts, validates and promotes tool archives.
pub struct ArchiveInstaller {
    progress_interval: Duration,
}

impl ArchiveInstaller {
    pub fn new(settings: &Settings) -> Self {
        Self {
            progress_interval: settings.progress_interval(),
        }
    }

    /// Installs `archive` into `final_dir`.
    ///
    /// `known_install` marks `final_dir` as belonging to a recorded install of
    /// the same tool even if its receipt is missing. When the descriptor asks
    /// for it, the returned version is read from the archive's top-level
    /// directory rather than taken from the descriptor.
    ///
    /// # Errors
    ///
    /// - `InstallPathConflict` if `final_dir` holds something else.
    /// - `ArchiveCorrupt` / `UnsupportedArchiveKind` from extraction, when
    ///   the entry point is missing afterwards, or when the archive does not
    ///   name the version it contains.
    /// - `Cancelled` if `cancel` fires before the promote step.
    pub async fn install(
        &self,
        archive: &Path,
        descriptor: &ToolDescriptor,
        final_dir: &Path,
        known_install: bool,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<InstalledTool, ToolError> {
        let tool = descriptor.tool;
        check_install_target(final_dir, tool, known_install)?;

        let parent = final_dir
            .parent()
            .ok_or_else(|| ToolError::InstallPathConflict(final_dir.to_path_buf()))?;
        tokio::fs::create_dir_all(parent).await?;

        let staging = tempfile::Builder::new()
            .prefix(&staging_prefix(tool))
            .tempdir_in(parent)?;
        debug!("Staging {} in {}", tool, staging.path().display());

        let mut reporter = StageReporter::begin(
            progress,
            tool,
            ProgressStage::Extracting,
            self.progress_interval,
        );
        self.unpack(archive, descriptor, staging.path(), &mut reporter, cancel)
            .await?;

        let staging_path = staging.path().to_path_buf();
        let entry_point = descriptor.entry_point.clone();
        let from_archive = descriptor.version_from_archive;
        let mut receipt = InstallReceipt {
            tool,
            version: descriptor.version.clone(),
            installed_at: Utc::now(),
        };
        let receipt = tokio::task::spawn_blocking(move || {
            let wrapper = flatten_single_root(&staging_path)?;
            if from_archive {
                receipt.version = wrapper
                    .as_deref()
                    .and_then(version_in_name)
                    .ok_or_else(|| {
                        ToolError::ArchiveCorrupt(format!(
                            "archive does not name its {} version",
                            tool
                        ))
                    })?;
            }
            validate_layout(&staging_path, &entry_point)?;
            write_receipt(&staging_path, &receipt)?;
            Ok::<_, ToolError>(receipt)
        })
        .await
        .map_err(join_error)??;
        reporter.finish();

        if receipt.version != descriptor.version {
            info!(
                "{} archive holds {} (release feed said {})",
                tool, receipt.version, descriptor.version
            );
        }

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let mut reporter = StageReporter::begin(
            progress,
            tool,
            ProgressStage::Installing,
            self.progress_interval,
        );
        let staging_path = staging.keep();
        if let Err(err) = promote(&staging_path, final_dir, tool).await {
            let _ = tokio::fs::remove_dir_all(&staging_path).await;
            return Err(err);
        }
        reporter.finish();

        info!("Installed {} {} to {}", tool, receipt.version, final_dir.display());
        Ok(InstalledTool {
            path: final_dir.to_path_buf(),
            version: receipt.version,
        })
    }

    /// Fills the staging directory, forwarding extraction progress from the
    /// blocking thread to the reporter on this task.
    async fn unpack(
        &self,
        archive: &Path,
        descriptor: &ToolDescriptor,
        staging: &Path,
        reporter: &mut StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        if descriptor.archive_format == ArchiveFormat::NativeInstaller {
            let target = staging.join(&descriptor.entry_point);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(archive, &target).await?;
            return Ok(());
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
        let archive = archive.to_path_buf();
        let staging = staging.to_path_buf();
        let format = descriptor.archive_format;
        let token = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            extract_archive(
                &archive,
                &staging,
                format,
                &mut |percent| {
                    let _ = tx.send(percent);
                },
                &token,
            )
        });

        while let Some(percent) = rx.recv().await {
            reporter.update(percent);
        }
        handle.await.map_err(join_error)?
    }
}

fn join_error(err: tokio::task::JoinError) -> ToolError {
    ToolError::Io(io::Error::other(err))
}

/// Decides whether `final_dir` may be replaced by an install of `tool`.
fn check_install_target(
    final_dir: &Path,
    tool: ExternalToolId,
    known_install: bool,
) -> Result<(), ToolError> {
    let meta = match fs::symlink_metadata(final_dir) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if !meta.is_dir() {
        return Err(ToolError::InstallPathConflict(final_dir.to_path_buf()));
    }
    if known_install || read_receipt(final_dir).is_some_and(|r| r.tool == tool) {
        return Ok(());
    }
    if fs::read_dir(final_dir)?.next().is_none() {
        return Ok(());
    }
    Err(ToolError::InstallPathConflict(final_dir.to_path_buf()))
}

/// Moves the contents of a lone top-level directory up into `dir` and
/// returns that directory's name.
fn flatten_single_root(dir: &Path) -> io::Result<Option<String>> {
    let entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    if entries.len() != 1 || !entries[0].file_type()?.is_dir() {
        return Ok(None);
    }
    let name = entries[0].file_name().to_string_lossy().into_owned();

    // The wrapper may contain an entry with its own name, so move it aside first.
    let wrapper = dir.join(format!(".flatten-{}", uuid::Uuid::new_v4().simple()));
    fs::rename(entries[0].path(), &wrapper)?;
    for entry in fs::read_dir(&wrapper)? {
        let entry = entry?;
        fs::rename(entry.path(), dir.join(entry.file_name()))?;
    }
    fs::remove_dir(&wrapper)?;

    debug!("Flattened top-level directory {} in {}", name, dir.display());
    Ok(Some(name))
}

/// First dotted version in a directory name such as `ffmpeg-7.1-amd64-static`.
fn version_in_name(name: &str) -> Option<String> {
    let pattern = Regex::new(r"\d+(?:\.\d+)+").ok()?;
    pattern.find(name).map(|m| m.as_str().to_string())
}

fn validate_layout(dir: &Path, entry_point: &str) -> Result<(), ToolError> {
    if fs::read_dir(dir)?.next().is_none() {
        return Err(ToolError::ArchiveCorrupt("archive produced no files".into()));
    }

    let entry = dir.join(entry_point);
    if !entry.is_file() {
        return Err(ToolError::ArchiveCorrupt(format!(
            "expected entry point {} not found",
            entry_point
        )));
    }
    make_executable(&entry)?;
    Ok(())
}

/// Replaces `final_dir` with `staging`.
///
/// A prior install is renamed to a backup sibling first and restored if the
/// second rename fails, so `final_dir` always holds a complete install.
async fn promote(staging: &Path, final_dir: &Path, tool: ExternalToolId) -> Result<(), ToolError> {
    let exists = tokio::fs::symlink_metadata(final_dir).await.is_ok();
    if !exists {
        tokio::fs::rename(staging, final_dir).await?;
        return Ok(());
    }

    let root = final_dir.parent().unwrap_or(final_dir);
    let backup = backup_dir(root, tool);
    tokio::fs::rename(final_dir, &backup).await?;

    if let Err(err) = tokio::fs::rename(staging, final_dir).await {
        warn!("Promote of {} failed ({}), restoring previous install", tool, err);
        tokio::fs::rename(&backup, final_dir).await?;
        return Err(err.into());
    }

    if let Err(err) = tokio::fs::remove_dir_all(&backup).await {
        warn!("Failed to remove previous install {}: {}", backup.display(), err);
    }
    Ok(())
}

/// Repairs an install root after a process died mid-install.
///
/// A tool whose directory is missing gets its newest receipted backup renamed
/// back into place. Every other backup and staging directory is deleted.
/// Directories carrying this process's id belong to a live install and are
/// left alone.
pub fn recover_install_root(root: &Path) -> io::Result<()> {
    let names: Vec<String> = match fs::read_dir(root) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for &tool in ExternalToolId::all() {
        let mut backups = leftovers(root, &names, &backup_name_prefix(tool));
        let stagings = leftovers(root, &names, &staging_name_prefix(tool));

        let final_dir = tool_dir(root, tool);
        if fs::symlink_metadata(&final_dir).is_err() {
            backups.sort_by_key(|dir| fs::metadata(dir).and_then(|m| m.modified()).ok());
            let newest = backups
                .iter()
                .rposition(|dir| read_receipt(dir).is_some_and(|r| r.tool == tool));
            if let Some(index) = newest {
                let backup = backups.remove(index);
                warn!(
                    "Restoring {} from interrupted install {}",
                    tool,
                    backup.display()
                );
                fs::rename(&backup, &final_dir)?;
            }
        }

        for dir in backups.into_iter().chain(stagings) {
            debug!("Removing leftover {}", dir.display());
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("Failed to remove {}: {}", dir.display(), e);
            }
        }
    }
    Ok(())
}

/// Entries of `names` starting with `prefix` that another process created.
fn leftovers(root: &Path, names: &[String], prefix: &str) -> Vec<PathBuf> {
    let own = std::process::id();
    names
        .iter()
        .filter(|name| {
            name.strip_prefix(prefix)
                .is_some_and(|suffix| owner_pid(suffix) != Some(own))
        })
        .map(|name| root.join(name))
        .collect()
}

/// Total size of the regular files under `path`.
pub fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => dir_size(&entry.path()),
            Ok(t) if t.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}
