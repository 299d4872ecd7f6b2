//! End-to-end CLI tests for the resumable-downloader binary.

#![allow(deprecated)]
#![allow(clippy::unwrap_used)]

mod support;
use support::socket_guard::start_mock_server_or_skip;

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

/// Binary command isolated from the user's config file.
fn command(config_home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("resumable-downloader").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_without_input_returns_zero() {
    let tempdir = TempDir::new().unwrap();
    command(tempdir.path()).write_stdin("").assert().success();
}

#[test]
fn test_binary_help_displays_usage() {
    let tempdir = TempDir::new().unwrap();
    command(tempdir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pause and resume"))
        .stdout(predicate::str::contains("--concurrency"));
}

#[test]
fn test_binary_version_displays_version() {
    let tempdir = TempDir::new().unwrap();
    command(tempdir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("resumable-downloader"));
}

#[test]
fn test_binary_rejects_out_of_range_concurrency() {
    let tempdir = TempDir::new().unwrap();
    command(tempdir.path())
        .args(["-c", "0", "https://example.com/a.bin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_rejects_invalid_config_file() {
    let tempdir = TempDir::new().unwrap();
    let config_dir = tempdir.path().join("resumable-downloader");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), "concurrency = 0\n").unwrap();

    command(tempdir.path())
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

#[tokio::test]
async fn test_binary_downloads_and_prints_json_events() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/files/report.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .insert_header("ETag", "\"r1\"")
                .set_body_bytes(b"id,value\n1,42\n".to_vec()),
        )
        .mount(&mock_server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let output_dir = tempdir.path().join("out");

    command(tempdir.path())
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("--json")
        .arg(format!("{}/files/report.csv", mock_server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""event":"start""#))
        .stdout(predicate::str::contains(r#""event":"complete""#));

    assert_eq!(
        std::fs::read(output_dir.join("report.csv")).unwrap(),
        b"id,value\n1,42\n"
    );
    assert!(output_dir.join(".breakpoints.db").exists());
}

#[tokio::test]
async fn test_binary_exit_code_partial_success_is_one() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/ok.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fail.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let assert = command(tempdir.path())
        .arg("--output-dir")
        .arg(tempdir.path().join("out"))
        .arg("-q")
        .arg(format!("{}/ok.bin", mock_server.uri()))
        .arg(format!("{}/fail.bin", mock_server.uri()))
        .assert()
        .failure();
    assert_eq!(
        assert.get_output().status.code(),
        Some(1),
        "partial success must yield exit code 1"
    );
}

#[tokio::test]
async fn test_binary_reads_urls_from_stdin() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/piped.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"piped".to_vec()))
        .mount(&mock_server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let output_dir = tempdir.path().join("out");
    command(tempdir.path())
        .arg("-o")
        .arg(&output_dir)
        .arg("-q")
        .write_stdin(format!("# mirror\n{}/piped.txt\n", mock_server.uri()))
        .assert()
        .success();

    assert_eq!(std::fs::read(output_dir.join("piped.txt")).unwrap(), b"piped");
}
