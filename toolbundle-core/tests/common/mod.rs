#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tokio::net::TcpListener;

use toolbundle_core::external_tools::{
    ArchiveFormat, ExternalToolId, Platform, PlatformResolver, ToolDescriptor, ToolError,
};
use toolbundle_core::{ProgressEvent, ProgressStage, Settings};

// ============================================================================
// Stub download server
// ============================================================================

#[derive(Default)]
pub struct StubState {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    /// Number of upcoming requests answered with 503.
    pub fail_next: AtomicU32,
    /// Cut the next full-body response off halfway.
    pub truncate_next: AtomicBool,
    /// `Range` header of every request, in order.
    pub ranges: Mutex<Vec<Option<String>>>,
}

pub struct StubServer {
    pub addr: SocketAddr,
    pub state: Arc<StubState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl StubServer {
    pub async fn start() -> Self {
        let state = Arc::new(StubState::default());
        let app = Router::new()
            .route("/files/:name", get(serve_file))
            .route("/stall/:name", get(stall))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn add_file(&self, name: &str, data: Vec<u8>) -> String {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), data);
        format!("http://{}/files/{}", self.addr, name)
    }

    pub fn stall_url(&self, name: &str) -> String {
        format!("http://{}/stall/{}", self.addr, name)
    }

    pub fn ranges(&self) -> Vec<Option<String>> {
        self.state.ranges.lock().unwrap().clone()
    }
}

async fn serve_file(
    State(state): State<Arc<StubState>>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.ranges.lock().unwrap().push(range.clone());

    if state
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let Some(body) = state.files.lock().unwrap().get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let total = body.len();

    let start = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|s| s.parse::<usize>().ok());
    if let Some(start) = start {
        if start >= total {
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", total))],
            )
                .into_response();
        }
        return (
            StatusCode::PARTIAL_CONTENT,
            [(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, total - 1, total),
            )],
            body[start..].to_vec(),
        )
            .into_response();
    }

    if state.truncate_next.swap(false, Ordering::SeqCst) {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::copy_from_slice(&body[..total / 2])),
            Err(std::io::Error::other("connection dropped")),
        ];
        let stream = futures::stream::iter(chunks).then(|item| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            item
        });
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total)
            .body(Body::from_stream(stream))
            .unwrap();
    }

    (StatusCode::OK, body).into_response()
}

async fn stall(UrlPath(_name): UrlPath<String>) -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(30)).await;
    StatusCode::OK
}

// ============================================================================
// Stub resolver
// ============================================================================

/// Resolver serving fixed descriptors; tools without one are unsupported.
#[derive(Default)]
pub struct StubResolver {
    descriptors: Mutex<HashMap<ExternalToolId, ToolDescriptor>>,
}

impl StubResolver {
    pub fn set(&self, descriptor: ToolDescriptor) {
        self.descriptors
            .lock()
            .unwrap()
            .insert(descriptor.tool, descriptor);
    }
}

#[async_trait]
impl PlatformResolver for StubResolver {
    async fn resolve(&self, tool: ExternalToolId) -> Result<ToolDescriptor, ToolError> {
        self.descriptors
            .lock()
            .unwrap()
            .get(&tool)
            .cloned()
            .ok_or_else(|| ToolError::UnsupportedPlatform {
                tool,
                platform: "stub".into(),
            })
    }

    async fn latest_version(&self, tool: ExternalToolId) -> Result<String, ToolError> {
        self.descriptors
            .lock()
            .unwrap()
            .get(&tool)
            .map(|d| d.version.clone())
            .ok_or_else(|| ToolError::MetadataUnavailable {
                tool,
                reason: "stub has no release feed".into(),
            })
    }
}

pub fn descriptor(tool: ExternalToolId, version: &str, url: String, entry_point: &str) -> ToolDescriptor {
    ToolDescriptor {
        tool,
        platform: Platform::LinuxX64,
        version: version.to_string(),
        archive_format: ArchiveFormat::from_url(&url).unwrap_or(ArchiveFormat::TarGz),
        download_url: url,
        expected_sha256: None,
        expected_size: None,
        entry_point: entry_point.to_string(),
        version_from_archive: false,
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Routes library logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_test_writer()
        .try_init();
}

/// Settings pointing at `root` that accept the local stub server.
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::with_root(root.join("tools"));
    settings.require_https = false;
    settings.allowed_hosts = vec!["127.0.0.1".to_string()];
    settings.initial_backoff_ms = 10;
    settings.max_backoff_ms = 50;
    settings.progress_interval_ms = 0;
    settings
}

/// Builds a tar.gz with every file below one top-level directory.
pub fn tar_gz(top: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(format!("{}/{}", top, name)).unwrap();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Builds a zip archive from flat file entries.
pub fn zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Progress sink recording every event.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl Recorder {
    pub fn sink(&self) -> impl Fn(ProgressEvent) + Send + Sync + '_ {
        move |event| self.events.lock().unwrap().push(event)
    }

    pub fn percents(&self, stage: ProgressStage) -> Vec<u8> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.stage == stage)
            .map(|e| e.percent)
            .collect()
    }

    pub fn stages(&self) -> Vec<ProgressStage> {
        let mut stages: Vec<ProgressStage> = Vec::new();
        for event in self.events.lock().unwrap().iter() {
            if stages.last() != Some(&event.stage) {
                stages.push(event.stage);
            }
        }
        stages
    }
}

/// Recursively lists files under `dir` relative to it, with contents.
pub fn snapshot_dir(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(dir).unwrap().to_string_lossy().into_owned();
                out.push((rel, std::fs::read(&path).unwrap()));
            }
        }
    }
    out.sort();
    out
}
