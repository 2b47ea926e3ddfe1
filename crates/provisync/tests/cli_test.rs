//! Integration tests for the `provisync` CLI binary.
//!
//! These cover argument parsing, offline decoding, config management and
//! error exit codes without a live backend.
#![allow(clippy::unwrap_used)]

use std::io::Write;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `provisync` binary with env isolation.
///
/// Clears all `PROVISYNC_*` env vars and points config directories at
/// `home` so tests never touch the user's real configuration.
fn provisync_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("provisync");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG")
        .env_remove("PROVISYNC_PROFILE")
        .env_remove("PROVISYNC_BASE_URL")
        .env_remove("PROVISYNC_TOKEN")
        .env_remove("PROVISYNC_OUTPUT")
        .env_remove("PROVISYNC_INSECURE")
        .env_remove("PROVISYNC_TIMEOUT");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = provisync_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("fetch"))
            .and(predicate::str::contains("decode"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("provisync"));
}

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_invalid_output_format() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .args(["-o", "xml", "decode"])
        .assert()
        .code(2);
}

// ── Decode ──────────────────────────────────────────────────────────

#[test]
fn test_decode_success_envelope_from_stdin() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .args(["-o", "json-compact", "decode"])
        .write_stdin(r#"{"success":true,"data":{"title":"rack 4"},"correlation_id":"c1"}"#)
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#""outcome":"success""#)
                .and(predicate::str::contains(r#""title":"rack 4""#))
                .and(predicate::str::contains(r#""correlation_id":"c1""#)),
        );
}

#[test]
fn test_decode_business_error_keeps_retry_hint() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .args(["-o", "json-compact", "decode", "-"])
        .write_stdin(
            r#"{"success":false,"error":{"code":"RATE_LIMITED","message":"slow down","retryable":true,"retry_after_seconds":5}}"#,
        )
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#""code":"RATE_LIMITED""#)
                .and(predicate::str::contains(r#""retry_after_seconds":5.0"#)),
        );
}

#[test]
fn test_decode_html_is_a_schema_violation() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .arg("decode")
        .write_stdin("<html>502 Bad Gateway</html>")
        .assert()
        .success()
        .stdout(predicate::str::contains("SCHEMA_VIOLATION"));
}

#[test]
fn test_decode_event_frame_from_file() {
    let home = tempfile::tempdir().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"success":true,"data":{{"kind":"child.changed","resource_id":"sess-1","timestamp":"2026-01-01T00:00:00Z","body":{{"key":"dev-1","data":{{"state":"ok"}}}}}}}}"#
    )
    .unwrap();

    provisync_cmd(home.path())
        .args(["-o", "yaml", "decode", "--event"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("outcome: event").and(predicate::str::contains("dev-1")));
}

#[test]
fn test_decode_missing_file_fails() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .args(["decode", "/nonexistent/provisync/body.json"])
        .assert()
        .code(1);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_watch_without_config_points_at_init() {
    let home = tempfile::tempdir().unwrap();
    let output = provisync_cmd(home.path())
        .args(["watch", "session", "sess-1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("config init"));
}

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();

    provisync_cmd(home.path())
        .args(["config", "init", "--base-url", "https://dash.test/api/v1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    // A second init refuses to overwrite.
    provisync_cmd(home.path())
        .args(["config", "init"])
        .assert()
        .code(2);

    provisync_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[resources.session]")
                .and(predicate::str::contains("https://dash.test/api/v1")),
        );
}

#[test]
fn test_unknown_resource_type_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .args(["config", "init", "--base-url", "https://dash.test/api/v1"])
        .assert()
        .success();

    let output = provisync_cmd(home.path())
        .args(["fetch", "device", "dev-1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("resources.device"));
}

#[test]
fn test_config_subcommands_exist() {
    let home = tempfile::tempdir().unwrap();
    provisync_cmd(home.path())
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("path")
                .and(predicate::str::contains("show"))
                .and(predicate::str::contains("init"))
                .and(predicate::str::contains("set-token")),
        );
}
