//! Installed-versus-latest comparison for every known tool.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::manifest::ManifestStore;
use super::resolver::PlatformResolver;
use super::types::ExternalToolId;
use super::version::compare_versions;

/// Update state of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub installed: Option<String>,
    /// `None` when the release feed could not be queried.
    pub latest: Option<String>,
    pub update_available: bool,
    /// Resolver failure for this tool, if any.
    pub error: Option<String>,
    /// Set when the versions were not dotted-numeric and were compared as
    /// plain strings.
    pub warning: Option<String>,
}

/// Warning text for a lexical version comparison.
pub const VERSION_FORMAT_UNRECOGNIZED: &str = "VersionFormatUnrecognized";

/// Derives the status from an installed and a latest version.
///
/// A missing install always counts as an available update, even when the
/// latest version is unknown.
pub fn evaluate(installed: Option<&str>, latest: Option<&str>) -> UpdateStatus {
    let (update_available, warning) = match (installed, latest) {
        (None, _) => (true, None),
        (Some(_), None) => (false, None),
        (Some(installed), Some(latest)) => {
            let cmp = compare_versions(installed, latest);
            let warning = (!cmp.recognized).then(|| {
                format!(
                    "{}: compared {:?} and {:?} as plain strings",
                    VERSION_FORMAT_UNRECOGNIZED, installed, latest
                )
            });
            (cmp.ordering == Ordering::Less, warning)
        }
    };

    UpdateStatus {
        installed: installed.map(str::to_string),
        latest: latest.map(str::to_string),
        update_available,
        error: None,
        warning,
    }
}

/// Checks every tool in parallel. A failing release feed only affects the
/// entry of its own tool.
pub async fn check_all(
    manifest: &ManifestStore,
    resolver: &dyn PlatformResolver,
) -> BTreeMap<ExternalToolId, UpdateStatus> {
    let checks = ExternalToolId::all().iter().map(|&tool| async move {
        let installed = manifest.get(tool).await.map(|entry| entry.version);
        let status = match resolver.latest_version(tool).await {
            Ok(latest) => evaluate(installed.as_deref(), Some(&latest)),
            Err(err) => {
                warn!("Could not determine latest {} version: {}", tool, err);
                UpdateStatus {
                    error: Some(err.to_string()),
                    ..evaluate(installed.as_deref(), None)
                }
            }
        };
        debug!("Update status for {}: {:?}", tool, status);
        (tool, status)
    });

    join_all(checks).await.into_iter().collect()
}
