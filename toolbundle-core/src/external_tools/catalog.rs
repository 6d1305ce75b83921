//! The fixed table of tools and where their builds live.
//!
//! Each tool pairs a release feed with per-platform download templates and
//! the entry point expected after install. A platform absent from a tool's
//! download list is unsupported for that tool.

use super::types::{
    EntryPoints, ExternalToolId, Platform, PlatformDownload, ReleaseFeed, ToolDefinition,
};

// ============================================================================
// FFmpeg
// ============================================================================

// Static Linux builds always track the current release, so their URLs carry
// no version. The installed version comes from the tarball's top directory
// (`ffmpeg-7.1-amd64-static`).
static FFMPEG_DOWNLOADS: [PlatformDownload; 4] = [
    PlatformDownload::new(
        Platform::LinuxX64,
        "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-amd64-static.tar.xz",
    ),
    PlatformDownload::new(
        Platform::LinuxArm64,
        "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-arm64-static.tar.xz",
    ),
    PlatformDownload::new(Platform::MacosX64, "https://evermeet.cx/ffmpeg/ffmpeg-{version}.zip"),
    PlatformDownload::new(
        Platform::WindowsX64,
        "https://www.gyan.dev/ffmpeg/builds/packages/ffmpeg-{version}-essentials_build.zip",
    ),
];

static FFMPEG: ToolDefinition = ToolDefinition {
    id: ExternalToolId::Ffmpeg,
    display_name: "FFmpeg",
    description: "Media transcoder for audio and video conversion",
    size_mb: 80,
    release_feed: ReleaseFeed::PlainText {
        url: "https://www.gyan.dev/ffmpeg/builds/release-version",
    },
    downloads: &FFMPEG_DOWNLOADS,
    entry_points: EntryPoints {
        linux: "ffmpeg",
        macos: "ffmpeg",
        windows: "bin/ffmpeg.exe",
    },
};

// ============================================================================
// Pandoc
// ============================================================================

static PANDOC_DOWNLOADS: [PlatformDownload; 5] = [
    PlatformDownload::new(
        Platform::LinuxX64,
        "https://github.com/jgm/pandoc/releases/download/{version}/pandoc-{version}-linux-amd64.tar.gz",
    ),
    PlatformDownload::new(
        Platform::LinuxArm64,
        "https://github.com/jgm/pandoc/releases/download/{version}/pandoc-{version}-linux-arm64.tar.gz",
    ),
    PlatformDownload::new(
        Platform::MacosX64,
        "https://github.com/jgm/pandoc/releases/download/{version}/pandoc-{version}-x86_64-macOS.zip",
    ),
    PlatformDownload::new(
        Platform::MacosArm64,
        "https://github.com/jgm/pandoc/releases/download/{version}/pandoc-{version}-arm64-macOS.zip",
    ),
    PlatformDownload::new(
        Platform::WindowsX64,
        "https://github.com/jgm/pandoc/releases/download/{version}/pandoc-{version}-windows-x86_64.zip",
    ),
];

static PANDOC: ToolDefinition = ToolDefinition {
    id: ExternalToolId::Pandoc,
    display_name: "Pandoc",
    description: "Universal document converter",
    size_mb: 40,
    release_feed: ReleaseFeed::GithubLatestRelease { repo: "jgm/pandoc" },
    downloads: &PANDOC_DOWNLOADS,
    entry_points: EntryPoints {
        linux: "bin/pandoc",
        macos: "bin/pandoc",
        windows: "pandoc.exe",
    },
};

// ============================================================================
// LibreOffice
// ============================================================================

// macOS and Windows ship native installer images copied into place
// untouched. The Linux AppImage is only published under an unversioned name
// and carries no version inside, so Linux is left out and fails closed.
static LIBREOFFICE_DOWNLOADS: [PlatformDownload; 4] = [
    PlatformDownload::new(
        Platform::MacosX64,
        "https://download.documentfoundation.org/libreoffice/stable/{version}/mac/x86_64/LibreOffice_{version}_MacOS_x86-64.dmg",
    ),
    PlatformDownload::new(
        Platform::MacosArm64,
        "https://download.documentfoundation.org/libreoffice/stable/{version}/mac/aarch64/LibreOffice_{version}_MacOS_aarch64.dmg",
    ),
    PlatformDownload::new(
        Platform::WindowsX64,
        "https://download.documentfoundation.org/libreoffice/stable/{version}/win/x86_64/LibreOffice_{version}_Win_x86-64.msi",
    ),
    PlatformDownload::new(
        Platform::WindowsArm64,
        "https://download.documentfoundation.org/libreoffice/stable/{version}/win/aarch64/LibreOffice_{version}_Win_aarch64.msi",
    ),
];

static LIBREOFFICE: ToolDefinition = ToolDefinition {
    id: ExternalToolId::LibreOffice,
    display_name: "LibreOffice",
    description: "Office suite for document and spreadsheet conversion",
    size_mb: 300,
    release_feed: ReleaseFeed::DirectoryListing {
        url: "https://download.documentfoundation.org/libreoffice/stable/",
    },
    downloads: &LIBREOFFICE_DOWNLOADS,
    entry_points: EntryPoints {
        linux: "soffice.AppImage",
        macos: "LibreOffice.dmg",
        windows: "LibreOffice.msi",
    },
};

/// Catalog record for `id`.
pub fn get_tool_definition(id: ExternalToolId) -> &'static ToolDefinition {
    match id {
        ExternalToolId::Ffmpeg => &FFMPEG,
        ExternalToolId::Pandoc => &PANDOC,
        ExternalToolId::LibreOffice => &LIBREOFFICE,
    }
}

/// All catalog records, in [`ExternalToolId::all`] order.
pub fn get_all_tool_definitions() -> Vec<&'static ToolDefinition> {
    ExternalToolId::all()
        .iter()
        .copied()
        .map(get_tool_definition)
        .collect()
}
