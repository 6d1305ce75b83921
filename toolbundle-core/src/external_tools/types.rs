//! Shared vocabulary of the acquisition pipeline.
//!
//! Identifiers and platforms are plain `Copy` enums; a [`ToolDescriptor`]
//! is the only owned, per-resolution value here.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Tool Identity
// ============================================================================

/// A tool this crate knows how to acquire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ExternalToolId {
    /// Audio and video transcoder.
    Ffmpeg,
    /// Markup format converter.
    Pandoc,
    /// Office suite, used headless for document conversion.
    LibreOffice,
}

impl ExternalToolId {
    /// Every tool, in the order `install_all` visits them.
    pub fn all() -> &'static [ExternalToolId] {
        &[Self::Ffmpeg, Self::Pandoc, Self::LibreOffice]
    }

    /// Stable key used in the manifest and as the install directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ffmpeg => "ffmpeg",
            Self::Pandoc => "pandoc",
            Self::LibreOffice => "libreoffice",
        }
    }
}

impl fmt::Display for ExternalToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExternalToolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = match s.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Self::Ffmpeg,
            "pandoc" => Self::Pandoc,
            "libreoffice" | "soffice" => Self::LibreOffice,
            _ => return Err(format!("no such tool: {s}")),
        };
        Ok(id)
    }
}

// ============================================================================
// Platforms
// ============================================================================

/// Operating system and CPU architecture pair the catalog keys builds by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    LinuxX64,
    LinuxArm64,
    MacosX64,
    MacosArm64,
    WindowsX64,
    WindowsArm64,
}

impl Platform {
    /// Every platform the catalog distinguishes.
    pub fn all() -> &'static [Platform] {
        &[
            Self::LinuxX64,
            Self::LinuxArm64,
            Self::MacosX64,
            Self::MacosArm64,
            Self::WindowsX64,
            Self::WindowsArm64,
        ]
    }

    /// Platform of the running process, or `None` outside the known set.
    pub fn detect() -> Option<Self> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Maps `std::env::consts` style OS and architecture names to a platform.
    pub fn from_parts(os: &str, arch: &str) -> Option<Self> {
        match (os, arch) {
            ("linux", "x86_64") => Some(Self::LinuxX64),
            ("linux", "aarch64") => Some(Self::LinuxArm64),
            ("macos", "x86_64") => Some(Self::MacosX64),
            ("macos", "aarch64") => Some(Self::MacosArm64),
            ("windows", "x86_64") => Some(Self::WindowsX64),
            ("windows", "aarch64") => Some(Self::WindowsArm64),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::LinuxX64 => "Linux (x86_64)",
            Self::LinuxArm64 => "Linux (ARM64)",
            Self::MacosX64 => "macOS (Intel)",
            Self::MacosArm64 => "macOS (Apple Silicon)",
            Self::WindowsX64 => "Windows (x86_64)",
            Self::WindowsArm64 => "Windows (ARM64)",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// Status
// ============================================================================

/// What the manager can say about a tool without touching the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    /// No usable install on disk.
    NotInstalled,
    /// Recorded in the manifest with its entry point present.
    Installed { version: String },
    /// No build is published for the host platform.
    UnsupportedPlatform,
}

impl ToolStatus {
    /// True when the tool can be launched.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }
}

// ============================================================================
// Archive Formats
// ============================================================================

/// Packaging of a downloaded artifact, which picks the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    /// `.tar.gz` / `.tgz`
    TarGz,
    /// `.tar.xz`
    TarXz,
    /// `.zip`
    Zip,
    /// `.7z`, recognized but not extracted.
    SevenZip,
    /// Self-contained installer or image (AppImage, dmg, msi); no extraction
    NativeInstaller,
}

impl ArchiveFormat {
    /// Guesses the format from the file suffix of a URL, case-insensitively.
    pub fn from_url(url: &str) -> Option<Self> {
        const SUFFIXES: &[(&str, ArchiveFormat)] = &[
            (".tar.gz", ArchiveFormat::TarGz),
            (".tgz", ArchiveFormat::TarGz),
            (".tar.xz", ArchiveFormat::TarXz),
            (".zip", ArchiveFormat::Zip),
            (".7z", ArchiveFormat::SevenZip),
            (".appimage", ArchiveFormat::NativeInstaller),
            (".dmg", ArchiveFormat::NativeInstaller),
            (".msi", ArchiveFormat::NativeInstaller),
            (".pkg", ArchiveFormat::NativeInstaller),
        ];
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| path.ends_with(suffix))
            .map(|(_, format)| *format)
    }

    pub fn requires_extraction(&self) -> bool {
        !matches!(self, Self::NativeInstaller)
    }

    /// File extension used for the downloaded archive on disk.
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::TarXz => "tar.xz",
            Self::Zip => "zip",
            Self::SevenZip => "7z",
            Self::NativeInstaller => "bin",
        }
    }
}

// ============================================================================
// Catalog Entries
// ============================================================================

/// One published build of a tool for a single platform.
///
/// `url` may carry `{version}` placeholders, filled from the release feed
/// at resolve time.
#[derive(Debug, Clone, Copy)]
pub struct PlatformDownload {
    pub platform: Platform,
    pub url: &'static str,
    /// Pinned SHA256 digest, hex.
    pub sha256: Option<&'static str>,
}

impl PlatformDownload {
    pub const fn new(platform: Platform, url: &'static str) -> Self {
        Self {
            platform,
            url,
            sha256: None,
        }
    }

    /// Pins the digest this build must hash to.
    pub const fn pinned(self, sha256: &'static str) -> Self {
        Self {
            sha256: Some(sha256),
            ..self
        }
    }

    /// Substitutes the resolved version into the URL template.
    pub fn url_for_version(&self, version: &str) -> String {
        self.url.replace("{version}", version)
    }

    /// True when the URL always serves the newest build, so the feed
    /// version says nothing about the bytes behind it.
    pub fn tracks_latest(&self) -> bool {
        !self.url.contains("{version}")
    }
}

/// Entry point of an install, relative to its directory, per OS family.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub linux: &'static str,
    pub macos: &'static str,
    pub windows: &'static str,
}

impl EntryPoints {
    /// The same relative path on every OS.
    pub const fn everywhere(path: &'static str) -> Self {
        Self {
            linux: path,
            macos: path,
            windows: path,
        }
    }

    pub fn for_platform(&self, platform: Platform) -> &'static str {
        match platform {
            Platform::LinuxX64 | Platform::LinuxArm64 => self.linux,
            Platform::MacosX64 | Platform::MacosArm64 => self.macos,
            Platform::WindowsX64 | Platform::WindowsArm64 => self.windows,
        }
    }
}

/// Where the latest published version of a tool is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFeed {
    /// A URL whose whole body is the version string.
    PlainText { url: &'static str },
    /// The `tag_name` of a GitHub repository's latest release.
    GithubLatestRelease { repo: &'static str },
    /// An HTML index page listing one `href="<version>/"` per release.
    DirectoryListing { url: &'static str },
}

/// Static catalog record for a managed tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolDefinition {
    pub id: ExternalToolId,
    pub display_name: &'static str,
    pub description: &'static str,
    /// Rough download size, for display only.
    pub size_mb: u32,
    pub release_feed: ReleaseFeed,
    /// Builds offered upstream; platforms missing here are unsupported.
    pub downloads: &'static [PlatformDownload],
    pub entry_points: EntryPoints,
}

impl ToolDefinition {
    pub fn download_for(&self, platform: Platform) -> Option<&'static PlatformDownload> {
        self.downloads.iter().find(|d| d.platform == platform)
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.download_for(platform).is_some()
    }

    pub fn entry_point_for(&self, platform: Platform) -> &'static str {
        self.entry_points.for_platform(platform)
    }
}

// ============================================================================
// Resolved Descriptor
// ============================================================================

/// Concrete download and install metadata for one tool on one platform.
///
/// Built fresh for every resolution; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub tool: ExternalToolId,
    pub platform: Platform,
    /// Version this download installs.
    pub version: String,
    pub download_url: String,
    pub archive_format: ArchiveFormat,
    /// Expected SHA256 (lowercase hex); `None` skips verification.
    pub expected_sha256: Option<String>,
    /// Expected size in bytes, if published.
    pub expected_size: Option<u64>,
    /// Relative path that must exist in the install directory.
    pub entry_point: String,
    /// Take the installed version from the archive's top-level directory
    /// name instead of `version`.
    pub version_from_archive: bool,
}
