mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{descriptor, tar_gz, test_settings, StubResolver, StubServer};
use tempfile::TempDir;
use toolbundle_core::external_tools::updates::VERSION_FORMAT_UNRECOGNIZED;
use toolbundle_core::{ExternalToolId, ExternalToolManager, InstalledToolInfo};

fn pandoc_archive(version: &str) -> Vec<u8> {
    tar_gz(
        &format!("pandoc-{}", version),
        &[("bin/pandoc", format!("pandoc {}", version).as_bytes())],
    )
}

#[tokio::test]
async fn older_install_reports_update() {
    let temp = TempDir::new().unwrap();
    let server = StubServer::start().await;
    let resolver = Arc::new(StubResolver::default());
    let manager =
        ExternalToolManager::with_resolver(test_settings(temp.path()), resolver.clone()).unwrap();

    let url = server.add_file("pandoc-2.9.tar.gz", pandoc_archive("2.9"));
    resolver.set(descriptor(ExternalToolId::Pandoc, "2.9", url, "bin/pandoc"));
    manager
        .install(ExternalToolId::Pandoc, &|_: toolbundle_core::ProgressEvent| {})
        .await
        .unwrap();

    let url = server.add_file("pandoc-3.1.tar.gz", pandoc_archive("3.1"));
    resolver.set(descriptor(ExternalToolId::Pandoc, "3.1", url, "bin/pandoc"));

    let statuses = manager.check_for_updates().await;
    let pandoc = &statuses[&ExternalToolId::Pandoc];
    assert_eq!(pandoc.installed.as_deref(), Some("2.9"));
    assert_eq!(pandoc.latest.as_deref(), Some("3.1"));
    assert!(pandoc.update_available);
    assert_eq!(pandoc.error, None);

    // The other tools have no feed in the stub; they still get an entry.
    let ffmpeg = &statuses[&ExternalToolId::Ffmpeg];
    assert_eq!(ffmpeg.latest, None);
    assert!(ffmpeg.error.is_some());
    assert!(ffmpeg.update_available);

    manager
        .install(ExternalToolId::Pandoc, &|_: toolbundle_core::ProgressEvent| {})
        .await
        .unwrap();
    let statuses = manager.check_for_updates().await;
    assert!(!statuses[&ExternalToolId::Pandoc].update_available);
}

#[tokio::test]
async fn unrecognized_versions_are_compared_lexically_with_warning() {
    let temp = TempDir::new().unwrap();
    let resolver = Arc::new(StubResolver::default());
    let manager =
        ExternalToolManager::with_resolver(test_settings(temp.path()), resolver.clone()).unwrap();

    manager
        .manifest()
        .set(InstalledToolInfo {
            tool: ExternalToolId::Ffmpeg,
            version: "git-2024-01".into(),
            install_path: manager.install_root().join("ffmpeg"),
            entry_point: "ffmpeg".into(),
            installed_at: Utc::now(),
            size_bytes: 0,
        })
        .await
        .unwrap();
    resolver.set(descriptor(
        ExternalToolId::Ffmpeg,
        "git-2024-06",
        "http://127.0.0.1:9/ffmpeg.tar.xz".into(),
        "ffmpeg",
    ));

    let statuses = manager.check_for_updates().await;
    let ffmpeg = &statuses[&ExternalToolId::Ffmpeg];
    assert!(ffmpeg.update_available);
    assert!(ffmpeg
        .warning
        .as_deref()
        .is_some_and(|w| w.starts_with(VERSION_FORMAT_UNRECOGNIZED)));
}
