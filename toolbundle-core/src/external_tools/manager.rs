//! Public face of the acquisition pipeline.
//!
//! [`ExternalToolManager`] drives resolve, download, install and record for
//! one tool at a time, and answers status queries from the manifest.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::catalog::{get_all_tool_definitions, get_tool_definition};
use super::downloader::Downloader;
use super::error::ToolError;
use super::installer::{dir_size, read_receipt, recover_install_root, ArchiveInstaller};
use super::manifest::{InstalledToolInfo, ManifestStore};
use super::paths;
use super::progress::{ProgressEvent, ProgressSink, ProgressStage};
use super::resolver::{CatalogResolver, PlatformResolver};
use super::types::{ExternalToolId, Platform, ToolDefinition, ToolStatus};
use super::updates::{check_all, UpdateStatus};
use crate::config::Settings;

// ============================================================================
// Tool Info
// ============================================================================

/// A catalog entry joined with what is on disk for it.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub definition: &'static ToolDefinition,
    pub status: ToolStatus,
    /// Set only while the tool is installed and launchable.
    pub executable_path: Option<PathBuf>,
}

// ============================================================================
// Install State Machine
// ============================================================================

/// Phase of a single install operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Idle,
    Resolving,
    Downloading,
    Extracting,
    Installing,
    Recording,
    Done,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Installing => "installing",
            Self::Recording => "recording",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

impl From<ProgressStage> for InstallState {
    fn from(stage: ProgressStage) -> Self {
        match stage {
            ProgressStage::Downloading => Self::Downloading,
            ProgressStage::Extracting => Self::Extracting,
            ProgressStage::Installing => Self::Installing,
        }
    }
}

/// Forwards progress to the caller and follows the pipeline state from the
/// stage of each event.
struct StateTracker<'a> {
    tool: ExternalToolId,
    inner: &'a dyn ProgressSink,
    state: Mutex<InstallState>,
}

impl<'a> StateTracker<'a> {
    fn new(tool: ExternalToolId, inner: &'a dyn ProgressSink) -> Self {
        Self {
            tool,
            inner,
            state: Mutex::new(InstallState::Idle),
        }
    }

    fn set(&self, next: InstallState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            debug!("{}: {} -> {}", self.tool, *state, next);
            *state = next;
        }
    }

    fn get(&self) -> InstallState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProgressSink for StateTracker<'_> {
    fn on_progress(&self, event: ProgressEvent) {
        self.set(event.stage.into());
        self.inner.on_progress(event);
    }
}

/// Cancellation token of one operation, fed by the manager, the caller's
/// token and the operation timeout.
struct OperationToken {
    token: CancellationToken,
    watchers: Vec<JoinHandle<()>>,
}

impl Drop for OperationToken {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Installs, updates and removes the bundled tools under one install root.
///
/// `Send + Sync`; share it behind an `Arc`. Concurrent installs of the same
/// tool are not serialized here and must be avoided by the caller.
pub struct ExternalToolManager {
    settings: Settings,
    /// `None` when the host is outside the known platform set.
    platform: Option<Platform>,
    resolver: Arc<dyn PlatformResolver>,
    downloader: Downloader,
    installer: ArchiveInstaller,
    manifest: ManifestStore,
    /// Parent of every operation token; replaced after each `cancel()`.
    cancel: Mutex<CancellationToken>,
}

impl ExternalToolManager {
    /// Manager backed by the built-in catalog and live release feeds.
    ///
    /// Creates the install root if needed and loads the manifest.
    pub fn new(settings: Settings) -> Result<Self, ToolError> {
        let resolver = Arc::new(CatalogResolver::new(&settings)?);
        Self::with_resolver(settings, resolver)
    }

    /// Manager that asks `resolver` for descriptors and latest versions.
    ///
    /// Backups and staging directories left by a process that died
    /// mid-install are cleaned up first, restoring an install whose
    /// replacement never landed.
    pub fn with_resolver(
        settings: Settings,
        resolver: Arc<dyn PlatformResolver>,
    ) -> Result<Self, ToolError> {
        paths::ensure_dirs_exist(&settings.install_root)?;
        if let Err(e) = recover_install_root(&settings.install_root) {
            warn!(
                "Recovery of {} incomplete: {}",
                settings.install_root.display(),
                e
            );
        }
        let manifest = ManifestStore::open(&settings.install_root)?;
        let platform = Platform::detect();

        info!(
            "Tool manager ready at {} for {}",
            settings.install_root.display(),
            platform.map_or("an unsupported platform".to_string(), |p| p.to_string())
        );

        Ok(Self {
            downloader: Downloader::new(&settings)?,
            installer: ArchiveInstaller::new(&settings),
            platform,
            resolver,
            manifest,
            cancel: Mutex::new(CancellationToken::new()),
            settings,
        })
    }

    pub fn install_root(&self) -> &Path {
        &self.settings.install_root
    }

    /// Host platform, as detected at construction.
    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    pub fn manifest(&self) -> &ManifestStore {
        &self.manifest
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns the recorded version of `tool`, if it is installed.
    pub async fn installed_version(&self, tool: ExternalToolId) -> Option<String> {
        self.manifest.get(tool).await.map(|entry| entry.version)
    }

    /// Every catalog tool with its current status.
    pub async fn list_tools(&self) -> Vec<ToolInfo> {
        let mut tools = Vec::new();
        for definition in get_all_tool_definitions() {
            tools.push(ToolInfo {
                definition,
                status: self.status(definition.id).await,
                executable_path: self.executable_path(definition.id).await,
            });
        }
        tools
    }

    /// Status from the manifest, confirmed against the entry point on disk.
    pub async fn status(&self, tool: ExternalToolId) -> ToolStatus {
        if let Some(entry) = self.manifest.get(tool).await {
            if installed_executable(&entry).is_some() {
                return ToolStatus::Installed {
                    version: entry.version,
                };
            }
            debug!(
                "{} recorded in manifest but entry point {} is missing",
                tool, entry.entry_point
            );
        }

        match self.platform {
            Some(p) if get_tool_definition(tool).supports(p) => {
                ToolStatus::NotInstalled
            }
            _ => ToolStatus::UnsupportedPlatform,
        }
    }

    /// Bytes on disk across all recorded installs, as measured at install time.
    pub async fn disk_usage(&self) -> u64 {
        self.manifest.snapshot().await.disk_usage()
    }

    /// Absolute path of the installed entry point, if it exists.
    pub async fn executable_path(&self, tool: ExternalToolId) -> Option<PathBuf> {
        let entry = self.manifest.get(tool).await?;
        installed_executable(&entry)
    }

    /// Compares installed versions with the latest published ones.
    pub async fn check_for_updates(&self) -> BTreeMap<ExternalToolId, UpdateStatus> {
        check_all(&self.manifest, self.resolver.as_ref()).await
    }

    // ========================================================================
    // Install / remove
    // ========================================================================

    /// Installs the latest version of `tool` and returns that version.
    pub async fn install(
        &self,
        tool: ExternalToolId,
        progress: &dyn ProgressSink,
    ) -> Result<String, ToolError> {
        self.install_with_cancel(tool, progress, &CancellationToken::new())
            .await
    }

    /// Installs every tool, one after another.
    pub async fn install_all(
        &self,
        progress: &dyn ProgressSink,
    ) -> BTreeMap<ExternalToolId, Result<String, ToolError>> {
        let mut results = BTreeMap::new();
        for &tool in ExternalToolId::all() {
            results.insert(tool, self.install(tool, progress).await);
        }
        results
    }

    /// Like [`install`](Self::install), aborting with `Cancelled` when
    /// `cancel` fires, [`cancel`](Self::cancel) is called, or the configured
    /// operation timeout elapses.
    pub async fn install_with_cancel(
        &self,
        tool: ExternalToolId,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let operation = self.operation_token(cancel);
        let tracker = StateTracker::new(tool, progress);

        let result = self.run_install(tool, &tracker, &operation.token).await;
        match &result {
            Ok(version) => {
                tracker.set(InstallState::Done);
                info!("{} {} installed successfully", tool, version);
            }
            Err(err) => warn!("{} install failed while {}: {}", tool, tracker.get(), err),
        }
        result
    }

    async fn run_install(
        &self,
        tool: ExternalToolId,
        tracker: &StateTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let root = &self.settings.install_root;

        tracker.set(InstallState::Resolving);
        let descriptor = tokio::select! {
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
            descriptor = self.resolver.resolve(tool) => descriptor?,
        };
        info!(
            "Installing {} {} from {}",
            tool, descriptor.version, descriptor.download_url
        );

        let archive = paths::archive_path(root, &descriptor);
        self.downloader
            .download(&descriptor, &archive, tracker, cancel)
            .await?;

        let final_dir = paths::tool_dir(root, tool);
        let known_install = self
            .manifest
            .get(tool)
            .await
            .is_some_and(|entry| entry.install_path == final_dir);
        let installed = self
            .installer
            .install(&archive, &descriptor, &final_dir, known_install, tracker, cancel)
            .await;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!("Failed to clean up archive {}: {}", archive.display(), e);
        }
        let installed = installed?;

        tracker.set(InstallState::Recording);
        let size_bytes = {
            let path = installed.path.clone();
            tokio::task::spawn_blocking(move || dir_size(&path))
                .await
                .unwrap_or_default()
        };
        let entry = self
            .manifest
            .set(InstalledToolInfo {
                tool,
                version: installed.version,
                install_path: installed.path,
                entry_point: descriptor.entry_point.clone(),
                installed_at: Utc::now(),
                size_bytes,
            })
            .await?;

        Ok(entry.version)
    }

    /// Deletes the tool's directory and its manifest entry.
    ///
    /// Refuses directories this crate did not create.
    pub async fn uninstall(&self, tool: ExternalToolId) -> Result<(), ToolError> {
        let recorded = self.manifest.get(tool).await;
        let tool_dir = recorded
            .as_ref()
            .map(|entry| entry.install_path.clone())
            .unwrap_or_else(|| paths::tool_dir(&self.settings.install_root, tool));

        info!("Uninstalling {}", tool);

        if tokio::fs::symlink_metadata(&tool_dir).await.is_ok() {
            let ours = recorded.is_some() || read_receipt(&tool_dir).is_some_and(|r| r.tool == tool);
            if !ours {
                return Err(ToolError::InstallPathConflict(tool_dir));
            }
            tokio::fs::remove_dir_all(&tool_dir).await?;
        }

        self.manifest.remove(tool).await?;

        info!("Removed {}", tool);
        Ok(())
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancels every operation currently in flight. Later operations are not
    /// affected.
    pub fn cancel(&self) {
        let mut current = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        current.cancel();
        *current = CancellationToken::new();
        info!("Cancelled in-flight tool operations");
    }

    fn operation_token(&self, caller: &CancellationToken) -> OperationToken {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token();
        let mut watchers = Vec::new();

        let linked = token.clone();
        let caller = caller.clone();
        watchers.push(tokio::spawn(async move {
            caller.cancelled().await;
            linked.cancel();
        }));

        if let Some(timeout) = self.settings.operation_timeout() {
            let linked = token.clone();
            watchers.push(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Operation timed out after {:?}", timeout);
                linked.cancel();
            }));
        }

        OperationToken { token, watchers }
    }
}

fn installed_executable(entry: &InstalledToolInfo) -> Option<PathBuf> {
    let path = entry.executable();
    path.is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_tools::types::ToolDescriptor;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct OfflineResolver;

    #[async_trait]
    impl PlatformResolver for OfflineResolver {
        async fn resolve(&self, tool: ExternalToolId) -> Result<ToolDescriptor, ToolError> {
            Err(ToolError::UnsupportedPlatform {
                tool,
                platform: "test".into(),
            })
        }

        async fn latest_version(&self, tool: ExternalToolId) -> Result<String, ToolError> {
            Err(ToolError::MetadataUnavailable {
                tool,
                reason: "offline".into(),
            })
        }
    }

    fn manager(temp_dir: &TempDir) -> ExternalToolManager {
        ExternalToolManager::with_resolver(
            Settings::with_root(temp_dir.path().join("tools")),
            Arc::new(OfflineResolver),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_manager_list_tools() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        let tools = manager.list_tools().await;
        assert_eq!(tools.len(), ExternalToolId::all().len());

        for tool in &tools {
            assert!(
                matches!(
                    tool.status,
                    ToolStatus::NotInstalled | ToolStatus::UnsupportedPlatform
                ),
                "Tool {:?} has unexpected status: {:?}",
                tool.definition.id,
                tool.status
            );
            assert!(tool.executable_path.is_none());
        }
    }

    #[tokio::test]
    async fn test_fresh_root_has_nothing_installed() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        assert_eq!(manager.installed_version(ExternalToolId::Ffmpeg).await, None);
        assert!(manager.executable_path(ExternalToolId::Pandoc).await.is_none());
        assert!(manager.install_root().join(".downloads").is_dir());
    }

    #[tokio::test]
    async fn test_resolve_failure_has_no_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        let result = manager
            .install(ExternalToolId::Pandoc, &|_: ProgressEvent| {})
            .await;
        assert!(matches!(result, Err(ToolError::UnsupportedPlatform { .. })));
        assert!(!manager.install_root().join("pandoc").exists());
        assert!(!manager.manifest().path().exists());
    }

    #[tokio::test]
    async fn test_status_reflects_manifest_and_entry_point() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let install_path = manager.install_root().join("pandoc");
        std::fs::create_dir_all(install_path.join("bin")).unwrap();

        manager
            .manifest()
            .set(InstalledToolInfo {
                tool: ExternalToolId::Pandoc,
                version: "3.1".into(),
                install_path: install_path.clone(),
                entry_point: "bin/pandoc".into(),
                installed_at: Utc::now(),
                size_bytes: 42,
            })
            .await
            .unwrap();
        assert!(!matches!(
            manager.status(ExternalToolId::Pandoc).await,
            ToolStatus::Installed { .. }
        ));

        std::fs::write(install_path.join("bin/pandoc"), b"bin").unwrap();
        assert_eq!(
            manager.status(ExternalToolId::Pandoc).await,
            ToolStatus::Installed {
                version: "3.1".into()
            }
        );
        assert_eq!(
            manager.executable_path(ExternalToolId::Pandoc).await,
            Some(install_path.join("bin/pandoc"))
        );

        assert_eq!(manager.disk_usage().await, 42);

        manager.uninstall(ExternalToolId::Pandoc).await.unwrap();
        assert!(!install_path.exists());
        assert_eq!(manager.installed_version(ExternalToolId::Pandoc).await, None);
    }

    #[tokio::test]
    async fn test_uninstall_refuses_foreign_directory() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let foreign = manager.install_root().join("ffmpeg");
        std::fs::create_dir_all(&foreign).unwrap();
        std::fs::write(foreign.join("keep.txt"), b"mine").unwrap();

        let result = manager.uninstall(ExternalToolId::Ffmpeg).await;
        assert!(matches!(result, Err(ToolError::InstallPathConflict(_))));
        assert!(foreign.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_update_check_reports_per_tool_errors() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        let statuses = manager.check_for_updates().await;
        assert_eq!(statuses.len(), ExternalToolId::all().len());
        for status in statuses.values() {
            assert_eq!(status.latest, None);
            assert!(status.error.is_some());
            assert!(status.update_available);
        }
    }

    #[test]
    fn test_install_state_follows_progress_stage() {
        let sink = |_: ProgressEvent| {};
        let tracker = StateTracker::new(ExternalToolId::Ffmpeg, &sink);
        assert_eq!(tracker.get(), InstallState::Idle);

        tracker.on_progress(ProgressEvent {
            tool: ExternalToolId::Ffmpeg,
            stage: ProgressStage::Extracting,
            percent: 0,
        });
        assert_eq!(tracker.get(), InstallState::Extracting);
        assert_eq!(InstallState::Recording.to_string(), "recording");
    }
}
