//! Integration tests for the download engine against a mock HTTP server.
//!
//! These cover the byte-range protocol end to end: fresh transfers,
//! `If-Range` resumption, validator mismatch and stale offsets.

#![allow(clippy::unwrap_used)]

mod support;
use support::socket_guard::start_mock_server_or_skip;

use std::path::Path;
use std::sync::Arc;

use resumable_core::breakpoint::SINGLE_BLOCK_ID;
use resumable_core::task::url_identity;
use resumable_core::{
    BreakpointRecord, BreakpointStore, CoreError, DownloadEngine, DownloadError, DownloadEvent,
    DownloadTask, HttpClient, MemoryBreakpointStore, TaskConfig, TaskHandle, TaskState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

const CONTENT: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123";

fn engine(store: &Arc<MemoryBreakpointStore>) -> DownloadEngine {
    DownloadEngine::new(Arc::new(HttpClient::new().unwrap()), store.clone())
}

fn task_for(url: &str, destination: &Path) -> TaskHandle {
    Arc::new(
        DownloadTask::from_config(TaskConfig::new(url, destination).with_buffer_size(8)).unwrap(),
    )
}

async fn run(engine: &DownloadEngine, task: &TaskHandle) -> Vec<DownloadEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DownloadEvent>();
    engine.start_download(Arc::clone(task), &tx).await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn labels(events: &[DownloadEvent]) -> Vec<&'static str> {
    let mut labels: Vec<&'static str> = events
        .iter()
        .map(|event| match event {
            DownloadEvent::Wait(_) => "wait",
            DownloadEvent::Start(_) => "start",
            DownloadEvent::Progress { .. } => "progress",
            DownloadEvent::Pause(_) => "pause",
            DownloadEvent::Cancel(_) => "cancel",
            DownloadEvent::Error { .. } => "error",
            DownloadEvent::Complete(_) => "complete",
        })
        .collect();
    labels.dedup();
    labels
}

async fn seed_breakpoint(
    store: &MemoryBreakpointStore,
    task: &TaskHandle,
    start_point: u64,
    etag: &str,
) {
    store
        .upsert(&BreakpointRecord {
            url_hash: url_identity(task.url()),
            tag: task.tag().to_string(),
            start_point,
            end_point: CONTENT.len() as u64,
            block_id: SINGLE_BLOCK_ID,
            etag: etag.to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fresh_download_writes_file_and_clears_breakpoint() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .and(header("Range", "bytes=0-"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .insert_header("ETag", "\"v1\"")
                .set_body_bytes(CONTENT.to_vec()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = engine(&store);
    let task = task_for(
        &format!("{}/file.bin", mock_server.uri()),
        &temp_dir.path().join("file.bin"),
    );

    let events = run(&engine, &task).await;

    assert_eq!(labels(&events), vec!["start", "progress", "complete"]);
    assert_eq!(task.state(), TaskState::Complete);
    assert!(task.supports_resume());
    assert_eq!(task.total_length(), Some(CONTENT.len() as u64));
    assert_eq!(std::fs::read(task.destination()).unwrap(), CONTENT);
    assert!(store.is_empty(), "completed transfer must not leave a breakpoint");
    assert_eq!(engine.stats().completed(), 1);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_total() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(CONTENT.to_vec()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = engine(&store);
    let task = task_for(
        &format!("{}/file.bin", mock_server.uri()),
        &temp_dir.path().join("file.bin"),
    );

    let events = run(&engine, &task).await;

    let offsets: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            DownloadEvent::Progress { transferred, .. } => Some(*transferred),
            _ => None,
        })
        .collect();
    assert!(offsets.len() >= 4, "8-byte buffer should split the body");
    assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(offsets.last().copied(), Some(CONTENT.len() as u64));
}

#[tokio::test]
async fn test_resume_sends_if_range_and_appends_tail() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .and(header("Range", "bytes=10-"))
        .and(header("If-Range", "\"v1\""))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 10-29/30")
                .insert_header("ETag", "\"v1\"")
                .set_body_bytes(CONTENT[10..].to_vec()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let destination = temp_dir.path().join("file.bin");
    std::fs::write(&destination, &CONTENT[..10]).unwrap();
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = engine(&store);
    let task = task_for(&format!("{}/file.bin", mock_server.uri()), &destination);
    seed_breakpoint(&store, &task, 10, "\"v1\"").await;

    let events = run(&engine, &task).await;

    assert_eq!(labels(&events), vec!["start", "progress", "complete"]);
    let first_progress = events.iter().find_map(|event| match event {
        DownloadEvent::Progress { transferred, total, .. } => Some((*transferred, *total)),
        _ => None,
    });
    assert_eq!(first_progress, Some((18, Some(30))));
    assert_eq!(std::fs::read(&destination).unwrap(), CONTENT);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_changed_resource_restarts_from_zero() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    // Validator mismatch: the server ignores the range and sends everything.
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .and(header("If-Range", "\"stale\""))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .insert_header("ETag", "\"v2\"")
                .set_body_bytes(CONTENT.to_vec()),
        )
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let destination = temp_dir.path().join("file.bin");
    std::fs::write(&destination, b"XXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX").unwrap();
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = engine(&store);
    let task = task_for(&format!("{}/file.bin", mock_server.uri()), &destination);
    seed_breakpoint(&store, &task, 10, "\"stale\"").await;

    let events = run(&engine, &task).await;

    assert_eq!(labels(&events), vec!["start", "progress", "complete"]);
    assert_eq!(std::fs::read(&destination).unwrap(), CONTENT);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_range_not_satisfiable_drops_breakpoint() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(ResponseTemplate::new(416))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let destination = temp_dir.path().join("file.bin");
    std::fs::write(&destination, &CONTENT[..10]).unwrap();
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = engine(&store);
    let task = task_for(&format!("{}/file.bin", mock_server.uri()), &destination);
    seed_breakpoint(&store, &task, 10, "\"v1\"").await;

    let events = run(&engine, &task).await;

    assert_eq!(labels(&events), vec!["error"]);
    assert_eq!(task.state(), TaskState::Error);
    assert!(store.is_empty(), "a rejected offset must not be retried");
}

#[tokio::test]
async fn test_not_found_reports_http_status_error() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = engine(&store);
    let task = task_for(
        &format!("{}/missing.bin", mock_server.uri()),
        &temp_dir.path().join("missing.bin"),
    );

    let events = run(&engine, &task).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        DownloadEvent::Error { error, .. } => assert!(
            matches!(
                error,
                CoreError::Transport(DownloadError::HttpStatus { status: 404, .. })
            ),
            "unexpected error: {error:?}"
        ),
        other => panic!("expected error event, got {other:?}"),
    }
    assert_eq!(engine.stats().failed(), 1);
}

#[tokio::test]
async fn test_response_without_range_support_is_not_resumable() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/plain.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "none")
                .set_body_bytes(CONTENT.to_vec()),
        )
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = engine(&store);
    let task = task_for(
        &format!("{}/plain.bin", mock_server.uri()),
        &temp_dir.path().join("plain.bin"),
    );

    let events = run(&engine, &task).await;

    assert_eq!(labels(&events), vec!["start", "progress", "complete"]);
    assert!(!task.supports_resume());
    assert_eq!(std::fs::read(task.destination()).unwrap(), CONTENT);
}

#[tokio::test]
async fn test_directory_destination_derives_file_name() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/releases/tool-1.2.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(CONTENT.to_vec()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = engine(&store);
    let task = task_for(
        &format!("{}/releases/tool-1.2.tar.gz", mock_server.uri()),
        temp_dir.path(),
    );

    run(&engine, &task).await;

    let expected = temp_dir.path().join("tool-1.2.tar.gz");
    assert_eq!(task.destination(), expected.as_path());
    assert_eq!(std::fs::read(expected).unwrap(), CONTENT);
}
