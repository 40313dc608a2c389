//! Basic CLI tests for the uabridge binary.

use std::io::Write;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn sample_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/uabridge.toml")
}

fn uabridge() -> Command {
    let mut cmd = Command::cargo_bin("uabridge").unwrap();
    cmd.env_remove("UABRIDGE_ENDPOINT")
        .env_remove("UABRIDGE_TRANSPORT_TIMEOUT_MS")
        .env_remove("UABRIDGE_COMMAND_TIMEOUT_MS")
        .env_remove("UABRIDGE_MAX_CONCURRENT")
        .arg("--config")
        .arg(sample_config());
    cmd
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("uabridge").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("devices"))
        .stdout(predicate::str::contains("profiles"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_check_sample_config() {
    uabridge()
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 profile(s), 2 device(s)"));
}

#[test]
fn test_exec_get() {
    uabridge()
        .args(["exec", "lobby", "climate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resource_name\": \"temp\""))
        .stdout(predicate::str::contains("21.5"));
}

#[test]
fn test_exec_repeat_serves_cache() {
    uabridge()
        .args(["exec", "lobby", "setpoint", "--repeat", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"issued\": 1"))
        .stdout(predicate::str::contains("\"issued\": 0"));
}

#[test]
fn test_exec_set() {
    uabridge()
        .args(["exec", "lobby", "setpoint", "--args", r#"{"setpoint": 23.0}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"verb\": \"set\""))
        .stdout(predicate::str::contains("23.0"));
}

#[test]
fn test_exec_locked_device_fails() {
    uabridge()
        .args(["exec", "archive", "climate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("locked"));
}

#[test]
fn test_exec_invalid_json_args() {
    uabridge()
        .args(["exec", "lobby", "setpoint", "--args", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--args is not valid JSON"));
}

#[test]
fn test_invalid_config_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[[devices]]\nname = \"D1\"\nprofile = \"missing\"\nendpoint = \"opc.tcp://plc:4840\""
    )
    .unwrap();

    Command::cargo_bin("uabridge")
        .unwrap()
        .arg("--config")
        .arg(file.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown profile"));
}
