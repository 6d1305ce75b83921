//! The installed-tools manifest.
//!
//! One JSON document at `{install_root}/manifest.json` records, per tool, the
//! version on disk and where it lives. Writes go to a sibling temp file that
//! is renamed over the old document, so a reader never sees half a file.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::ToolError;
use super::paths;
use super::types::ExternalToolId;

const SCHEMA_VERSION: u32 = 1;

/// Manifest record of one completed install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledToolInfo {
    pub tool: ExternalToolId,
    pub version: String,
    /// Absolute install directory.
    pub install_path: PathBuf,
    /// Launchable file, relative to `install_path`.
    #[serde(default)]
    pub entry_point: String,
    pub installed_at: DateTime<Utc>,
    /// Bytes on disk under `install_path` at install time.
    #[serde(default)]
    pub size_bytes: u64,
}

impl InstalledToolInfo {
    /// Absolute path of the entry point.
    pub fn executable(&self) -> PathBuf {
        self.install_path.join(&self.entry_point)
    }
}

/// On-disk manifest document, keyed by [`ExternalToolId::as_str`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub tools: BTreeMap<String, InstalledToolInfo>,
}

impl Default for ToolsManifest {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            tools: BTreeMap::new(),
        }
    }
}

impl ToolsManifest {
    pub fn entry(&self, tool: ExternalToolId) -> Option<&InstalledToolInfo> {
        self.tools.get(tool.as_str())
    }

    /// Sum of the recorded install sizes.
    pub fn disk_usage(&self) -> u64 {
        self.tools.values().map(|entry| entry.size_bytes).sum()
    }
}

/// Reads the manifest at `path`.
///
/// A missing file is an empty manifest. A file that does not parse is renamed
/// to `{path}.corrupt` and an empty manifest is returned in its place.
pub fn load_manifest_from(path: &Path) -> Result<ToolsManifest, ToolError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No manifest at {} yet", path.display());
            return Ok(ToolsManifest::default());
        }
        Err(e) => return Err(e.into()),
    };

    let mut manifest = match serde_json::from_str::<ToolsManifest>(&raw) {
        Ok(manifest) => manifest,
        Err(e) => {
            let aside = corrupt_path(path);
            warn!(
                "Unreadable manifest {} ({}); moved to {}",
                path.display(),
                e,
                aside.display()
            );
            fs::rename(path, &aside)?;
            return Ok(ToolsManifest::default());
        }
    };

    if manifest.schema_version != SCHEMA_VERSION {
        info!(
            "Upgrading manifest schema {} -> {}",
            manifest.schema_version, SCHEMA_VERSION
        );
        manifest.schema_version = SCHEMA_VERSION;
    }
    Ok(manifest)
}

fn write_failed(what: &str, err: &dyn std::fmt::Display) -> ToolError {
    ToolError::ManifestWriteFailed(format!("{}: {}", what, err))
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

/// Writes `manifest` to `path` through a temp file and rename.
pub fn save_manifest_to(manifest: &ToolsManifest, path: &Path) -> Result<(), ToolError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| write_failed("create manifest directory", &e))?;

    let content = serde_json::to_string_pretty(manifest)
        .map_err(|e| write_failed("serialize manifest", &e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| write_failed("create temp file", &e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| write_failed("write temp file", &e))?;
    tmp.persist(path).map_err(|e| {
        ToolError::ManifestWriteFailed(format!("replace {}: {}", path.display(), e.error))
    })?;

    debug!("Wrote manifest {}", path.display());
    Ok(())
}

/// In-process owner of the manifest file.
///
/// Every mutation persists a modified copy first and only then swaps it into
/// memory, so a failed write leaves both the file and the cached view as
/// they were.
pub struct ManifestStore {
    path: PathBuf,
    state: RwLock<ToolsManifest>,
}

impl ManifestStore {
    /// Loads `{root}/manifest.json`, starting empty when there is none.
    pub fn open(root: &Path) -> Result<Self, ToolError> {
        let path = paths::manifest_path(root);
        let manifest = load_manifest_from(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(manifest),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, tool: ExternalToolId) -> Option<InstalledToolInfo> {
        self.state.read().await.entry(tool).cloned()
    }

    pub async fn snapshot(&self) -> ToolsManifest {
        self.state.read().await.clone()
    }

    /// Records `entry`, replacing any previous entry for the same tool.
    ///
    /// `installed_at` is moved forward if needed so it is strictly later than
    /// the replaced entry's. Returns the entry as stored.
    pub async fn set(&self, mut entry: InstalledToolInfo) -> Result<InstalledToolInfo, ToolError> {
        let mut state = self.state.write().await;

        if let Some(previous) = state.entry(entry.tool) {
            if entry.installed_at <= previous.installed_at {
                entry.installed_at = previous.installed_at + Duration::milliseconds(1);
            }
        }

        let mut next = state.clone();
        next.tools
            .insert(entry.tool.as_str().to_string(), entry.clone());
        *state = self.persist(next).await?;

        info!("Recorded {} {} in manifest", entry.tool, entry.version);
        Ok(entry)
    }

    /// Writes `next` on the blocking pool and hands it back once it is on disk.
    async fn persist(&self, next: ToolsManifest) -> Result<ToolsManifest, ToolError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save_manifest_to(&next, &path).map(|()| next))
            .await
            .map_err(|e| write_failed("manifest writer", &e))?
    }

    /// Removes the entry for `tool`, returning it if there was one.
    pub async fn remove(&self, tool: ExternalToolId) -> Result<Option<InstalledToolInfo>, ToolError> {
        let mut state = self.state.write().await;
        if state.entry(tool).is_none() {
            return Ok(None);
        }

        let mut next = state.clone();
        let removed = next.tools.remove(tool.as_str());
        *state = self.persist(next).await?;

        info!("Removed {} from manifest", tool);
        Ok(removed)
    }
}
