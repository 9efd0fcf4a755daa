mod common;

use assert_cmd::Command;
use common::{Fixture, MANIFEST};
use content_sync::model::DownloadPolicy;
use predicates::prelude::*;
use std::fs::write;
use tempfile::NamedTempFile;

/// Creates a config file pointing the CLI at a local manifest and scratch storage.
fn create_config(manifest_url: &str, storage_dir: &std::path::Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        r#"
storage_dir: {}
repository: docs
remote:
  id: local
  url: "{manifest_url}"
  policy: immediate
pipeline:
  retry_base_delay_ms: 1
"#,
        storage_dir.display()
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

#[test]
fn sync_then_show_lists_the_synced_content() {
    let fixture = Fixture::new();
    let remote = fixture.remote(
        "site",
        &[("index.html", b"<html></html>"), ("img/logo.png", b"png")],
        DownloadPolicy::Immediate,
    );
    let storage = tempfile::tempdir().expect("storage dir");
    let config = create_config(&remote.url, storage.path());

    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .arg("sync")
        .arg("--config")
        .arg(config.path())
        .env_remove("CONTENT_SYNC_STORAGE_DIR")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Synchronise complete")
                .and(predicate::str::contains("\"created\": 2")),
        );

    assert!(storage.path().join("repositories.json").is_file());
    assert!(storage.path().join("artifacts").is_dir());

    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .arg("show")
        .arg("--config")
        .arg(config.path())
        .env_remove("CONTENT_SYNC_STORAGE_DIR")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"version\": 1")
                .and(predicate::str::contains("index.html"))
                .and(predicate::str::contains("img/logo.png")),
        );
}

#[test]
fn show_of_unknown_version_fails() {
    let fixture = Fixture::new();
    let remote = fixture.remote("site", &[("a.txt", b"a")], DownloadPolicy::OnDemand);
    let storage = tempfile::tempdir().expect("storage dir");
    let config = create_config(&remote.url, storage.path());

    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .args(["sync", "--mirror", "--config"])
        .arg(config.path())
        .env_remove("CONTENT_SYNC_STORAGE_DIR")
        .assert()
        .success();

    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .args(["show", "--version", "7", "--config"])
        .arg(config.path())
        .env_remove("CONTENT_SYNC_STORAGE_DIR")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no version 7"));
}

#[test]
fn sync_with_unreachable_manifest_fails() {
    let fixture = Fixture::new();
    let storage = tempfile::tempdir().expect("storage dir");
    let missing = fixture.dir.path().join("nowhere").join(MANIFEST);
    let config = create_config(&common::file_url(&missing), storage.path());

    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .arg("sync")
        .arg("--config")
        .arg(config.path())
        .env_remove("CONTENT_SYNC_STORAGE_DIR")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Synchronisation failed"));
}

#[test]
fn missing_config_file_fails() {
    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .args(["sync", "--config", "/definitely/not/here.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn policy_flag_overrides_the_configured_policy() {
    let fixture = Fixture::new();
    let remote = fixture.remote(
        "site",
        &[("a.txt", b"a"), ("b.txt", b"b")],
        DownloadPolicy::Immediate,
    );
    let storage = tempfile::tempdir().expect("storage dir");
    let config = create_config(&remote.url, storage.path());

    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .args(["sync", "--policy", "on_demand", "--config"])
        .arg(config.path())
        .env_remove("CONTENT_SYNC_STORAGE_DIR")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"artifacts_deferred\": 2")
                .and(predicate::str::contains("\"artifacts_downloaded\": 0")),
        );

    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .args(["sync", "--config"])
        .arg(config.path())
        .env_remove("CONTENT_SYNC_STORAGE_DIR")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"artifacts_downloaded\": 2"));
}

#[test]
fn unknown_policy_is_rejected() {
    Command::cargo_bin("content-sync")
        .expect("Binary exists")
        .args(["sync", "--policy", "lazy", "--config", "unused.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown download policy"));
}
