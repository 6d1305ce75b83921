//! Platform resolution: (tool, platform) to a concrete download descriptor.
//!
//! [`CatalogResolver`] combines the static catalog with the tool's release
//! feed. The feed is queried on every resolution so a descriptor always
//! reflects the current metadata.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::catalog::get_tool_definition;
use super::downloader::build_http_client;
use super::error::ToolError;
use super::retry::RetryPolicy;
use super::types::{ArchiveFormat, ExternalToolId, Platform, ReleaseFeed, ToolDescriptor};
use super::version::{compare_versions, normalize_version};
use crate::config::Settings;

/// Source of download descriptors and latest-version metadata.
#[async_trait]
pub trait PlatformResolver: Send + Sync {
    /// Resolves the download descriptor for `tool` on the running platform.
    async fn resolve(&self, tool: ExternalToolId) -> Result<ToolDescriptor, ToolError>;

    /// Returns the latest published version of `tool`.
    async fn latest_version(&self, tool: ExternalToolId) -> Result<String, ToolError>;
}

/// Resolver backed by the built-in catalog and live release feeds.
pub struct CatalogResolver {
    platform: Option<Platform>,
    client: Client,
    retry: RetryPolicy,
}

impl CatalogResolver {
    /// Creates a resolver for the detected platform.
    pub fn new(settings: &Settings) -> Result<Self, ToolError> {
        Ok(Self {
            platform: Platform::detect(),
            client: build_http_client(settings)?,
            retry: RetryPolicy::from_settings(settings),
        })
    }

    /// Overrides the platform descriptors are resolved for.
    pub fn with_platform(mut self, platform: Option<Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    /// Builds the descriptor for `tool` at `version` without any network access.
    pub fn descriptor_for(
        &self,
        tool: ExternalToolId,
        version: &str,
    ) -> Result<ToolDescriptor, ToolError> {
        let platform = self.supported_platform(tool)?;
        let def = get_tool_definition(tool);
        let download = def
            .download_for(platform)
            .ok_or_else(|| unsupported(tool, Some(platform)))?;

        let download_url = download.url_for_version(version);
        let archive_format =
            ArchiveFormat::from_url(&download_url).ok_or_else(|| ToolError::MetadataUnavailable {
                tool,
                reason: format!("unrecognized archive type in {}", download_url),
            })?;

        Ok(ToolDescriptor {
            tool,
            platform,
            version: version.to_string(),
            download_url,
            archive_format,
            expected_sha256: download.sha256.map(str::to_lowercase),
            expected_size: None,
            entry_point: def.entry_point_for(platform).to_string(),
            version_from_archive: download.tracks_latest(),
        })
    }

    fn supported_platform(&self, tool: ExternalToolId) -> Result<Platform, ToolError> {
        match self.platform {
            Some(platform) if get_tool_definition(tool).supports(platform) => Ok(platform),
            other => Err(unsupported(tool, other)),
        }
    }

    async fn fetch_text(&self, url: &str, accept: &str) -> Result<String, ToolError> {
        let client = &self.client;
        self.retry
            .run("release metadata", &CancellationToken::new(), move |_| async move {
                let response = client
                    .get(url)
                    .header(reqwest::header::ACCEPT, accept)
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ToolError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Ok(response.text().await?)
            })
            .await
    }
}

#[async_trait]
impl PlatformResolver for CatalogResolver {
    async fn resolve(&self, tool: ExternalToolId) -> Result<ToolDescriptor, ToolError> {
        // Fail closed before touching the network.
        let platform = self.supported_platform(tool)?;
        let version = self.latest_version(tool).await?;
        let descriptor = self.descriptor_for(tool, &version)?;
        info!(
            "Resolved {} {} for {}: {}",
            tool, descriptor.version, platform, descriptor.download_url
        );
        Ok(descriptor)
    }

    async fn latest_version(&self, tool: ExternalToolId) -> Result<String, ToolError> {
        let feed = get_tool_definition(tool).release_feed;
        let metadata_error = |reason: String| ToolError::MetadataUnavailable { tool, reason };

        debug!("Querying release feed {:?} for {}", feed, tool);

        let parsed = match feed {
            ReleaseFeed::PlainText { url } => self
                .fetch_text(url, "text/plain")
                .await
                .map(|body| parse_plain_text(&body)),
            ReleaseFeed::GithubLatestRelease { repo } => {
                let url = format!("https://api.github.com/repos/{}/releases/latest", repo);
                self.fetch_text(&url, "application/vnd.github+json")
                    .await
                    .map(|body| parse_github_release(&body))
            }
            ReleaseFeed::DirectoryListing { url } => self
                .fetch_text(url, "text/html")
                .await
                .map(|body| parse_directory_listing(&body)),
        };

        match parsed {
            Ok(Some(version)) => Ok(version),
            Ok(None) => Err(metadata_error(format!(
                "no version found in release feed {:?}",
                feed
            ))),
            Err(err) => Err(metadata_error(err.to_string())),
        }
    }
}

fn unsupported(tool: ExternalToolId, platform: Option<Platform>) -> ToolError {
    ToolError::UnsupportedPlatform {
        tool,
        platform: match platform {
            Some(p) => p.to_string(),
            None => format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        },
    }
}

// ============================================================================
// Feed Parsing
// ============================================================================

/// Parses a feed whose body is just the version.
pub fn parse_plain_text(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(normalize_version)
        .filter(|v| !v.is_empty())
}

/// Parses the `tag_name` of a GitHub release JSON document.
pub fn parse_github_release(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("tag_name")?
        .as_str()
        .map(normalize_version)
        .filter(|v| !v.is_empty())
}

/// Picks the highest `href="<version>/"` entry of an index page.
pub fn parse_directory_listing(body: &str) -> Option<String> {
    let pattern = Regex::new(r#"href="(\d+(?:\.\d+)+)/""#).ok()?;
    pattern
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .max_by(|a, b| compare_versions(a, b).ordering)
}
