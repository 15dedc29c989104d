//! Integration tests for the podlaunch CLI.
//!
//! These tests run the actual executable. None of them need a container
//! runtime: they cover argument handling, configuration and the failure
//! paths taken before or while connecting.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the podlaunch binary.
#[allow(deprecated)]
fn podlaunch() -> Command {
    let mut cmd = Command::cargo_bin("podlaunch").expect("failed to find podlaunch binary");
    cmd.env_remove("PODLAUNCH_ENDPOINT");
    cmd
}

/// Creates a Command running in `dir`, with the user config dir pointed there too.
fn podlaunch_in(dir: &TempDir) -> Command {
    let mut cmd = podlaunch();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join(".config"));
    cmd
}

fn write_config(dir: &TempDir, content: &str) {
    fs::write(dir.path().join("podlaunch.toml"), content).unwrap();
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    podlaunch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("stop"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("port"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("--endpoint"));
}

#[test]
fn test_version_flag() {
    podlaunch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("podlaunch"));
}

#[test]
fn test_start_help_shows_options() {
    podlaunch()
        .args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--image"))
        .stdout(predicate::str::contains("--host-port"))
        .stdout(predicate::str::contains("--env"))
        .stdout(predicate::str::contains("--command"))
        .stdout(predicate::str::contains("--detach"));
}

// -----------------------------------------------------------------------------
// Port command
// -----------------------------------------------------------------------------

#[test]
fn test_port_prints_port_in_range() {
    podlaunch()
        .args(["port", "--min", "40000", "--max", "40010"])
        .assert()
        .success()
        .stdout(predicate::function(|out: &str| {
            out.trim()
                .parse::<u16>()
                .is_ok_and(|p| (40000..=40010).contains(&p))
        }));
}

#[test]
fn test_port_rejects_empty_range() {
    podlaunch()
        .args(["port", "--min", "5000", "--max", "5000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid port range: 5000-5000"));
}

// -----------------------------------------------------------------------------
// Check command
// -----------------------------------------------------------------------------

#[test]
fn test_check_defaults() {
    let dir = TempDir::new().unwrap();

    podlaunch_in(&dir)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("unix:///var/run/docker.sock"))
        .stdout(predicate::str::contains("minecraft-pod"));
}

#[test]
fn test_check_reads_local_config() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
[runtime]
endpoint = "tcp://192.168.121.232:2375"

[workload]
pod_name = "survival"
host_port = 0
"#,
    );

    podlaunch_in(&dir)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("tcp://192.168.121.232:2375"))
        .stdout(predicate::str::contains("survival"))
        .stdout(predicate::str::contains("auto (1024-49151)"));
}

#[test]
fn test_check_endpoint_from_env() {
    let dir = TempDir::new().unwrap();

    podlaunch_in(&dir)
        .env("PODLAUNCH_ENDPOINT", "tcp://10.1.2.3:2375")
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("tcp://10.1.2.3:2375"));
}

#[test]
fn test_check_rejects_bad_port_range() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[ports]\nmin = 6000\nmax = 5000\n");

    podlaunch_in(&dir)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid port range 6000-5000"));
}

#[test]
fn test_check_rejects_empty_image() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[workload]\nimage = \"\"\n");

    podlaunch_in(&dir)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("image cannot be empty"));
}

#[test]
fn test_explicit_config_must_exist() {
    let dir = TempDir::new().unwrap();

    podlaunch_in(&dir)
        .args(["--config", "missing.toml", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_malformed_config_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[runtime\nendpoint = 1");

    podlaunch_in(&dir)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

// -----------------------------------------------------------------------------
// Start and runtime commands
// -----------------------------------------------------------------------------

#[test]
fn test_start_validates_before_connecting() {
    let dir = TempDir::new().unwrap();

    // The endpoint is unreachable; validation must fail first.
    podlaunch_in(&dir)
        .args(["--endpoint", "tcp://127.0.0.1:9", "start", "--image", ""])
        .assert()
        .failure()
        .stderr(predicate::str::contains("image cannot be empty"))
        .stderr(predicate::str::contains("connect").not());
}

#[test]
fn test_start_rejects_bad_env() {
    let dir = TempDir::new().unwrap();

    podlaunch_in(&dir)
        .args(["start", "--env", "NOEQUALS"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected KEY=VALUE"));
}

#[test]
fn test_start_uid_flags_conflict() {
    podlaunch()
        .args(["start", "--uid", "abc", "--random-uid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_unsupported_endpoint_rejected() {
    let dir = TempDir::new().unwrap();

    podlaunch_in(&dir)
        .args(["--endpoint", "localhost", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported endpoint"));
}

#[test]
fn test_missing_socket_fails_to_connect() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("nothing-here.sock");

    podlaunch_in(&dir)
        .args(["--endpoint", socket.to_str().unwrap(), "status", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect to runtime"));
}
