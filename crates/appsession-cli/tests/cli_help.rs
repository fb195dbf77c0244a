use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("appsession")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_run_help_shows_options() {
    cargo_bin_cmd!("appsession")
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SCRIPT"))
        .stdout(predicate::str::contains("--query"))
        .stdout(predicate::str::contains("--run-on-save"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("appsession")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1"));
}
