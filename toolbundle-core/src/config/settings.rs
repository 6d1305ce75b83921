//! Installer settings.
//!
//! Settings are read from an optional JSON file; every field has a default so
//! a partial file (or none at all) is valid.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the install root.
pub const ROOT_ENV_VAR: &str = "TOOLBUNDLE_ROOT";

/// Directory name used under the platform data directory.
const APP_DIR_NAME: &str = "toolbundle";

/// Hosts the bundled catalog downloads from.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "github.com",
    "githubusercontent.com",
    "api.github.com",
    "johnvansickle.com",
    "evermeet.cx",
    "gyan.dev",
    "documentfoundation.org",
];

/// Returns the default install root.
///
/// e.g. `~/.local/share/toolbundle/tools` on Linux. Falls back to the OS
/// temp directory when no data directory is known.
pub fn default_install_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join("tools")
}

/// Installer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding one install directory per tool plus the manifest.
    pub install_root: PathBuf,

    /// Retries after the first attempt for transient network failures.
    pub max_retries: u32,

    /// Backoff before the first retry; doubles per attempt.
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff delay.
    pub max_backoff_ms: u64,

    /// TCP connect timeout.
    pub connect_timeout_secs: u64,

    /// Maximum time without receiving data before a transfer is abandoned.
    pub read_timeout_secs: u64,

    /// Whole-operation deadline; the operation is cancelled when it passes.
    pub operation_timeout_secs: Option<u64>,

    /// Minimum interval between download progress events.
    pub progress_interval_ms: u64,

    /// Hosts downloads may come from (exact or subdomain). Empty allows any.
    pub allowed_hosts: Vec<String>,

    /// Reject non-HTTPS download URLs.
    pub require_https: bool,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            connect_timeout_secs: 15,
            read_timeout_secs: 60,
            operation_timeout_secs: None,
            progress_interval_ms: 100,
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
            require_https: true,
            user_agent: format!("toolbundle/{}", crate::VERSION),
        }
    }
}

impl Settings {
    /// Settings rooted at `install_root`, everything else default.
    pub fn with_root(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            ..Self::default()
        }
    }

    /// Load settings from a JSON file, using defaults for missing values.
    ///
    /// A missing file yields defaults; an unparseable one logs a warning and
    /// yields defaults. `TOOLBUNDLE_ROOT` overrides the install root.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut settings = if path.exists() {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<Settings>(&json) {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "Failed to parse settings, using defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        if let Some(root) = std::env::var_os(ROOT_ENV_VAR) {
            settings.install_root = PathBuf::from(root);
        }

        settings.validate();
        Ok(settings)
    }

    /// Save settings as pretty JSON.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    /// Validate and clamp settings to usable ranges.
    pub fn validate(&mut self) {
        self.max_retries = self.max_retries.min(10);
        self.initial_backoff_ms = self.initial_backoff_ms.max(1);
        self.max_backoff_ms = self.max_backoff_ms.max(self.initial_backoff_ms);
        self.connect_timeout_secs = self.connect_timeout_secs.max(1);
        self.read_timeout_secs = self.read_timeout_secs.max(1);
        self.progress_interval_ms = self.progress_interval_ms.clamp(10, 5_000);
        if self.user_agent.trim().is_empty() {
            self.user_agent = Self::default().user_agent;
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}
