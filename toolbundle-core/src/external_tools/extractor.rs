//! Unpacking of downloaded archives into a staging directory.
//!
//! Every entry is resolved against the canonical destination before it is
//! written; anything that would land outside it is skipped with a warning.
//! Extraction is blocking, so callers run it on a blocking thread and get
//! percentages back through `on_progress`.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ToolError;
use super::progress::percent_of;
use super::types::ArchiveFormat;

/// Unpacks `archive_path` into `dest_dir`, creating it if needed.
///
/// `on_progress` receives 0 to 100: by entry count for zip, by compressed
/// bytes consumed for tar. `cancel` is polled between entries.
///
/// # Errors
///
/// `ArchiveCorrupt` when the archive cannot be read, `UnsupportedArchiveKind`
/// for formats with no extractor, `Io` for local filesystem failures.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    format: ArchiveFormat,
    on_progress: &mut dyn FnMut(u8),
    cancel: &CancellationToken,
) -> Result<(), ToolError> {
    info!(
        "Unpacking {} ({:?}) into {}",
        archive_path.display(),
        format,
        dest_dir.display()
    );

    fs::create_dir_all(dest_dir)?;
    let root = dest_dir.canonicalize()?;

    match format {
        ArchiveFormat::Zip => unpack_zip(archive_path, &root, on_progress, cancel),
        ArchiveFormat::TarGz => {
            let (source, meter) = Meter::open(archive_path)?;
            let decoder = flate2::read::GzDecoder::new(BufReader::new(source));
            unpack_tar(decoder, &root, &meter, on_progress, cancel)
        }
        ArchiveFormat::TarXz => {
            let (source, meter) = Meter::open(archive_path)?;
            let decoder = xz2::read::XzDecoder::new(BufReader::new(source));
            unpack_tar(decoder, &root, &meter, on_progress, cancel)
        }
        ArchiveFormat::SevenZip | ArchiveFormat::NativeInstaller => {
            Err(ToolError::UnsupportedArchiveKind(format))
        }
    }
}

fn corrupt(err: impl std::fmt::Display) -> ToolError {
    ToolError::ArchiveCorrupt(err.to_string())
}

/// Copy errors can come from the decoder or from the output file; only the
/// former mean the archive is bad.
fn copy_error(err: io::Error) -> ToolError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::Other => corrupt(err),
        _ => ToolError::Io(err),
    }
}

/// Joins `relative` onto `root` when the result provably stays inside it.
///
/// Parent directories are created on the way so that an earlier entry that
/// turned a directory into a link is caught by the canonical check.
fn contained(root: &Path, relative: &Path) -> io::Result<Option<PathBuf>> {
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain {
        return Ok(None);
    }

    let target = root.join(relative);
    let Some(parent) = target.parent() else {
        return Ok(None);
    };
    fs::create_dir_all(parent)?;
    if !parent.canonicalize()?.starts_with(root) || target == root {
        return Ok(None);
    }
    Ok(Some(target))
}

fn write_file(source: &mut dyn Read, target: &Path, mode: Option<u32>) -> Result<(), ToolError> {
    let mut out = File::create(target)?;
    io::copy(source, &mut out).map_err(copy_error)?;
    keep_exec_bits(target, mode)?;
    Ok(())
}

// ============================================================================
// zip
// ============================================================================

fn unpack_zip(
    archive_path: &Path,
    root: &Path,
    on_progress: &mut dyn FnMut(u8),
    cancel: &CancellationToken,
) -> Result<(), ToolError> {
    let mut archive = zip::ZipArchive::new(File::open(archive_path)?)
        .map_err(|e| corrupt(format!("{}: {}", archive_path.display(), e)))?;
    let count = archive.len();

    for index in 0..count {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let mut entry = archive.by_index(index).map_err(corrupt)?;
        let target = match entry.enclosed_name() {
            Some(name) => contained(root, &name)?,
            None => None,
        };
        match target {
            None => warn!("Skipping zip entry outside destination: {}", entry.name()),
            Some(dir) if entry.is_dir() => fs::create_dir_all(dir)?,
            Some(file) => {
                let mode = entry.unix_mode();
                write_file(&mut entry, &file, mode)?;
            }
        }

        on_progress(percent_of(index as u64 + 1, count as u64));
    }

    debug!("Unpacked {} zip entries", count);
    Ok(())
}

// ============================================================================
// tar
// ============================================================================

/// Tracks how much of the compressed file the decoder has pulled.
struct Meter {
    consumed: Arc<AtomicU64>,
    size: u64,
}

struct Metered<R> {
    inner: R,
    consumed: Arc<AtomicU64>,
}

impl<R: Read> Read for Metered<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

impl Meter {
    fn open(path: &Path) -> Result<(Metered<File>, Self), ToolError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let consumed = Arc::new(AtomicU64::new(0));
        let reader = Metered {
            inner: file,
            consumed: Arc::clone(&consumed),
        };
        Ok((reader, Self { consumed, size }))
    }

    fn percent(&self) -> u8 {
        percent_of(self.consumed.load(Ordering::Relaxed), self.size)
    }
}

fn unpack_tar<R: Read>(
    reader: R,
    root: &Path,
    meter: &Meter,
    on_progress: &mut dyn FnMut(u8),
    cancel: &CancellationToken,
) -> Result<(), ToolError> {
    let mut archive = tar::Archive::new(reader);
    let mut seen = 0usize;

    for entry in archive.entries().map_err(corrupt)? {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let mut entry = entry.map_err(corrupt)?;
        seen += 1;

        let kind = entry.header().entry_type();
        let name = entry.path().map_err(corrupt)?.into_owned();
        if kind.is_symlink() || kind.is_hard_link() {
            // Link targets are unchecked paths.
            warn!("Skipping link entry {:?}", name);
            continue;
        }

        match contained(root, &name)? {
            None => warn!("Skipping tar entry outside destination: {:?}", name),
            Some(dir) if kind.is_dir() => fs::create_dir_all(dir)?,
            Some(file) if kind.is_file() => {
                let mode = entry.header().mode().ok();
                write_file(&mut entry, &file, mode)?;
            }
            Some(_) => debug!("Ignoring {:?} entry {:?}", kind, name),
        }

        on_progress(meter.percent());
    }

    if seen == 0 {
        return Err(corrupt("tar archive has no entries"));
    }
    debug!("Unpacked {} tar entries", seen);
    Ok(())
}

// ============================================================================
// Permissions
// ============================================================================

/// Widens an archived mode to 0o755 when it carried any execute bit.
#[cfg(unix)]
fn keep_exec_bits(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match mode {
        Some(mode) if mode & 0o111 != 0 => {
            fs::set_permissions(path, fs::Permissions::from_mode((mode | 0o755) & 0o7777))
        }
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn keep_exec_bits(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Adds `rwxr-xr-x` to `path`. No-op off Unix.
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions)?;
        debug!("Marked {} executable", path.display());
    }
    Ok(())
}
