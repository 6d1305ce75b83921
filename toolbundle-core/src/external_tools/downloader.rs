//! Resumable file downloader with progress reporting and integrity checks.
//!
//! Bytes stream into `{dest}.part`; the destination path only ever appears
//! by renaming a complete, verified part file. An interrupted transfer is
//! resumed with a `Range` request when the server answers `206`, otherwise it
//! restarts from zero.

use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::error::ToolError;
use super::paths::partial_path;
use super::progress::{percent_of, ProgressSink, ProgressStage, StageReporter};
use super::retry::RetryPolicy;
use super::types::ToolDescriptor;
use crate::config::Settings;

/// Builds the HTTP client shared by metadata and download requests.
pub fn build_http_client(settings: &Settings) -> Result<Client, ToolError> {
    Client::builder()
        .user_agent(settings.user_agent.clone())
        .connect_timeout(settings.connect_timeout())
        .read_timeout(settings.read_timeout())
        .build()
        .map_err(|e| ToolError::Network(format!("Failed to build HTTP client: {}", e)))
}

// ============================================================================
// URL Security Validation
// ============================================================================

/// Validates that a URL is safe for downloading.
///
/// Checks:
/// - URL scheme must be HTTPS (when `require_https`)
/// - Host must be in the allowed list, or a subdomain of an entry
fn validate_url(
    url_str: &str,
    allowed_hosts: &[String],
    require_https: bool,
) -> Result<Url, ToolError> {
    let url = Url::parse(url_str)
        .map_err(|e| ToolError::InvalidUrl(format!("{}: {}", url_str, e)))?;

    match url.scheme() {
        "https" => {}
        "http" if !require_https => {}
        _ => {
            return Err(ToolError::InvalidUrl(format!(
                "URL must use HTTPS: {}",
                url_str
            )))
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| ToolError::InvalidUrl(format!("URL must have a host: {}", url_str)))?;

    let is_allowed = allowed_hosts.is_empty()
        || allowed_hosts
            .iter()
            .any(|domain| host == domain || host.ends_with(&format!(".{}", domain)));

    if !is_allowed {
        return Err(ToolError::InvalidUrl(format!(
            "Download host not allowed: {}",
            host
        )));
    }

    Ok(url)
}

// ============================================================================
// Downloader
// ============================================================================

/// Streams release archives to disk.
pub struct Downloader {
    client: Client,
    retry: RetryPolicy,
    settings: Settings,
}

impl Downloader {
    pub fn new(settings: &Settings) -> Result<Self, ToolError> {
        Ok(Self {
            client: build_http_client(settings)?,
            retry: RetryPolicy::from_settings(settings),
            settings: settings.clone(),
        })
    }

    /// Downloads `descriptor.download_url` to `dest`.
    ///
    /// Transient failures are retried with backoff, resuming from the bytes
    /// already on disk. Returns the total size of the completed file.
    ///
    /// # Errors
    ///
    /// - `InvalidUrl` if the URL fails validation.
    /// - `Network` / `HttpStatus` once retries are exhausted.
    /// - `ChecksumMismatch` if the finished file does not match the expected
    ///   SHA256 or size. The part file is deleted in that case.
    /// - `Cancelled` if `cancel` fires; the part file is kept for resuming.
    pub async fn download(
        &self,
        descriptor: &ToolDescriptor,
        dest: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, ToolError> {
        let url = &descriptor.download_url;
        info!("Downloading {} to {}", url, dest.display());

        validate_url(url, &self.settings.allowed_hosts, self.settings.require_https)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = partial_path(dest);
        // One reporter spans every attempt.
        let reporter = tokio::sync::Mutex::new(StageReporter::begin(
            progress,
            descriptor.tool,
            ProgressStage::Downloading,
            self.settings.progress_interval(),
        ));

        let what = format!("Download of {}", url);
        let bytes = {
            let (reporter, part) = (&reporter, part.as_path());
            self.retry
                .run(&what, cancel, move |_| async move {
                    let mut reporter = reporter.lock().await;
                    self.fetch_once(url, part, descriptor.expected_size, &mut reporter, cancel)
                        .await
                })
                .await?
        };

        if let Err(err) = verify_integrity(&part, bytes, descriptor).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(err);
        }

        tokio::fs::rename(&part, dest).await?;
        reporter.into_inner().finish();

        info!(
            "Download complete: {} bytes written to {}",
            bytes,
            dest.display()
        );
        Ok(bytes)
    }

    /// One request/stream cycle. Returns the size of the part file when the
    /// response body has been fully written.
    async fn fetch_once(
        &self,
        url: &str,
        part: &Path,
        expected_size: Option<u64>,
        reporter: &mut StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, ToolError> {
        let mut resume_from = match tokio::fs::metadata(part).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.client.get(url);
        if resume_from > 0 {
            debug!("Resuming {} from byte {}", url, resume_from);
            request = request.header(RANGE, format!("bytes={}-", resume_from));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && resume_from > 0 {
            // Part file no longer matches upstream; start over.
            tokio::fs::remove_file(part).await?;
            return Err(ToolError::Network(format!(
                "resume offset {} rejected by server",
                resume_from
            )));
        }
        if !status.is_success() {
            return Err(ToolError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let resumed = resume_from > 0
            && status == StatusCode::PARTIAL_CONTENT
            && response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_start)
                == Some(resume_from);

        let mut file = if resumed {
            OpenOptions::new().append(true).open(part).await?
        } else {
            if resume_from > 0 {
                debug!("Server did not honour range request; restarting {}", url);
                resume_from = 0;
            }
            File::create(part).await?
        };

        let total = response
            .content_length()
            .map(|len| len + resume_from)
            .or(expected_size);
        debug!("Content-Length: {:?} (offset {})", total, resume_from);

        let mut stream = response.bytes_stream();
        let mut written = resume_from;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    return Err(ToolError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    // Keep what arrived so the retry can resume from it.
                    file.flush().await?;
                    return Err(ToolError::Network(e.to_string()));
                }
                None => break,
            };

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(total) = total {
                reporter.update(percent_of(written, total));
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// Extracts the start offset from `Content-Range: bytes START-END/TOTAL`.
fn content_range_start(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes ")?
        .split('-')
        .next()?
        .trim()
        .parse()
        .ok()
}

async fn verify_integrity(
    path: &Path,
    bytes: u64,
    descriptor: &ToolDescriptor,
) -> Result<(), ToolError> {
    if let Some(expected) = descriptor.expected_size {
        if expected != bytes {
            return Err(ToolError::ChecksumMismatch {
                expected: format!("{} bytes", expected),
                actual: format!("{} bytes", bytes),
            });
        }
    }

    if let Some(expected) = &descriptor.expected_sha256 {
        let actual = sha256_file(path).await?;
        if actual != expected.to_lowercase() {
            return Err(ToolError::ChecksumMismatch {
                expected: expected.clone(),
                actual,
            });
        }
        debug!("SHA256 verified: {}", actual);
    }

    Ok(())
}

/// Computes the lowercase hex SHA256 of a file.
pub async fn sha256_file(path: &Path) -> Result<String, ToolError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format_sha256_hex(&hasher.finalize()))
}

/// Formats a SHA256 hash as lowercase hex without using the hex crate.
fn format_sha256_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}
