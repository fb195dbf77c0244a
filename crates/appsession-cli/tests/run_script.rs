#![cfg(unix)]

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("hello.sh");
    fs::write(&path, body).unwrap();
    path
}

fn message_types(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| {
            let value: Value = serde_json::from_str(line).unwrap();
            value["type"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn test_run_streams_session_messages() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "echo \"hello $APPSESSION_QUERY_STRING\"\n");

    let output = cargo_bin_cmd!("appsession")
        .env("APPSESSION_HOME", dir.path())
        .env_remove("APPSESSION_CONFIG")
        .arg("run")
        .arg(&script)
        .args(["--query", "name=ada"])
        .write_stdin("")
        .output()
        .unwrap();

    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        message_types(&output.stdout),
        vec![
            "new_session",
            "session_state_changed",
            "delta",
            "script_finished",
            "session_state_changed",
        ]
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hello name=ada"), "{stdout}");
    assert!(stdout.contains("\"name\":\"hello\""), "{stdout}");
}

#[test]
fn test_run_reports_script_failure() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "echo oops >&2\nexit 2\n");

    cargo_bin_cmd!("appsession")
        .env("APPSESSION_HOME", dir.path())
        .env_remove("APPSESSION_CONFIG")
        .arg("run")
        .arg(&script)
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"error\""))
        .stdout(predicate::str::contains("oops"));
}

#[test]
fn test_run_reports_invalid_back_message() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "sleep 1\n");

    cargo_bin_cmd!("appsession")
        .env("APPSESSION_HOME", dir.path())
        .env_remove("APPSESSION_CONFIG")
        .arg("run")
        .arg(&script)
        .write_stdin("not json\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\":\"exception\""))
        .stdout(predicate::str::contains("DecodeError"));
}

#[test]
fn test_run_missing_script_fails() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("appsession")
        .env("APPSESSION_HOME", dir.path())
        .env_remove("APPSESSION_CONFIG")
        .args(["run", "does-not-exist.sh"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("script not found"));
}
