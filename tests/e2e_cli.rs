//! CLI end-to-end tests
//!
//! Tests for the pkgferry command-line interface.

use assert_cmd::prelude::*;
use pkgferry_pkg::fixtures::{OrbisBuilder, ProsperoBuilder};
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the pkgferry binary
#[allow(deprecated)]
fn pkgferry_cmd() -> Command {
    Command::cargo_bin("pkgferry").unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = pkgferry_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = pkgferry_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pkgferry"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("upload"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = pkgferry_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "pkgferry {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_inspect_orbis() {
    let dir = tempdir().unwrap();
    let pkg = dir.path().join("game.pkg");
    fs::write(
        &pkg,
        OrbisBuilder::game("Gravity Rush", "CUSA01113")
            .icon(b"\x89PNG-icon".to_vec())
            .build(),
    )
    .unwrap();
    let icons = dir.path().join("icons");

    let mut cmd = pkgferry_cmd();
    cmd.arg("inspect")
        .arg(&pkg)
        .arg("--icon-dir")
        .arg(&icons)
        .assert()
        .success()
        .stdout(predicate::str::contains("Format: Orbis"))
        .stdout(predicate::str::contains("Title: Gravity Rush"))
        .stdout(predicate::str::contains("Title ID: CUSA01113"));

    let stored: Vec<_> = fs::read_dir(&icons).unwrap().collect();
    assert_eq!(stored.len(), 1);
}

#[test]
fn test_cli_inspect_prospero_json() {
    let dir = tempdir().unwrap();
    let pkg = dir.path().join("game.pkg");
    fs::write(&pkg, ProsperoBuilder::game("Astro Bot", "PPSA01325").build()).unwrap();

    let output = pkgferry_cmd()
        .arg("inspect")
        .arg(&pkg)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["format"], "prospero");
    assert_eq!(json["title"], "Astro Bot");
    assert_eq!(json["title_id"], "PPSA01325");
    assert_eq!(json["source"], "structured");
    assert!(json["icon_ref"].is_null());
}

#[test]
fn test_cli_inspect_unknown_format_fails_with_hint() {
    let dir = tempdir().unwrap();
    let pkg = dir.path().join("notes.txt");
    fs::write(&pkg, vec![b'x'; 256]).unwrap();

    let mut cmd = pkgferry_cmd();
    cmd.arg("inspect")
        .arg(&pkg)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Format error"))
        .stderr(predicate::str::contains("Hint:"));
}

#[test]
fn test_cli_inspect_missing_file() {
    let mut cmd = pkgferry_cmd();
    cmd.arg("inspect")
        .arg("/nonexistent/game.pkg")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_validate_valid_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[server]
url = "http://192.168.1.20:9090"

[upload]
max_empty_retries = 5
"#,
    )
    .unwrap();

    let mut cmd = pkgferry_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"))
        .stdout(predicate::str::contains("http://192.168.1.20:9090"))
        .stdout(predicate::str::contains("3 list, 5 empty"));
}

#[test]
fn test_cli_validate_rejects_bad_url() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "[server]\nurl = \"console:9090\"\n").unwrap();

    let mut cmd = pkgferry_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("http://"));
}

#[test]
fn test_cli_validate_without_config_uses_defaults() {
    let dir = tempdir().unwrap();

    let mut cmd = pkgferry_cmd();
    cmd.current_dir(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"));
}

#[test]
fn test_cli_upload_rejects_bad_server_override() {
    let dir = tempdir().unwrap();
    let pkg = dir.path().join("game.pkg");
    fs::write(&pkg, OrbisBuilder::game("Game", "CUSA00001").build()).unwrap();

    let mut cmd = pkgferry_cmd();
    cmd.current_dir(dir.path())
        .arg("upload")
        .arg(&pkg)
        .arg("--server")
        .arg("ftp://console")
        .assert()
        .failure()
        .stderr(predicate::str::contains("http://"));
}
