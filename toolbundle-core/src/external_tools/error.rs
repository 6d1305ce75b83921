//! Error taxonomy for tool acquisition.

use std::path::PathBuf;
use thiserror::Error;

use super::types::{ArchiveFormat, ExternalToolId};

/// Errors returned by the tool acquisition operations.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} is not available for {platform}")]
    UnsupportedPlatform {
        tool: ExternalToolId,
        platform: String,
    },
    #[error("Release metadata for {tool} unavailable: {reason}")]
    MetadataUnavailable {
        tool: ExternalToolId,
        reason: String,
    },
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },
    #[error("SHA256 checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("Archive is corrupt: {0}")]
    ArchiveCorrupt(String),
    #[error("Unsupported archive kind: {0:?}")]
    UnsupportedArchiveKind(ArchiveFormat),
    #[error("Install path is occupied by something else: {}", .0.display())]
    InstallPathConflict(PathBuf),
    #[error("Failed to write manifest: {0}")]
    ManifestWriteFailed(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Invalid download URL: {0}")]
    InvalidUrl(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Returns true for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::HttpStatus { status, .. } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => Self::Network(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ToolError::Network("reset".into()).is_transient());
        for status in [408, 429, 500, 502, 503] {
            let err = ToolError::HttpStatus {
                status,
                url: String::new(),
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
        for status in [400, 403, 404, 416] {
            let err = ToolError::HttpStatus {
                status,
                url: String::new(),
            };
            assert!(!err.is_transient(), "{status} should not be transient");
        }
        assert!(!ToolError::Cancelled.is_transient());
        assert!(!ToolError::ChecksumMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ToolError::UnsupportedPlatform {
            tool: ExternalToolId::Ffmpeg,
            platform: "macOS (Apple Silicon)".into(),
        };
        assert_eq!(
            err.to_string(),
            "ffmpeg is not available for macOS (Apple Silicon)"
        );
    }
}
