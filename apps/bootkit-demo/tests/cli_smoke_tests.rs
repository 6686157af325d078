#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CLI smoke tests for the bootkit-demo binary: help output, configuration
//! validation and a short in-process run.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn run_demo(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_bootkit-demo"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute bootkit-demo")
}

/// `Err("elapsed")` means the process was still running when the timeout hit.
async fn run_demo_with_timeout(
    args: &[&str],
    timeout_duration: Duration,
) -> Result<std::process::Output, Box<dyn std::error::Error>> {
    let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_bootkit-demo"));
    cmd.args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;

    match timeout(timeout_duration, child.wait_with_output()).await {
        Ok(result) => result.map_err(Into::into),
        Err(_elapsed) => Err("elapsed".into()),
    }
}

fn write_config(dir: &TempDir, contents: &str) -> String {
    let path = dir.path().join("bootkit.yaml");
    std::fs::write(&path, contents).expect("Failed to write config file");
    path_str(&path)
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_owned()
}

#[test]
fn test_cli_help_command() {
    let output = run_demo(&["--help"]);

    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("bootkit-demo"), "Should contain binary name");
    assert!(stdout.contains("Usage:"), "Should contain usage information");
    assert!(stdout.contains("run"), "Should contain 'run' subcommand");
    assert!(stdout.contains("cluster"), "Should contain 'cluster' subcommand");
    assert!(stdout.contains("check"), "Should contain 'check' subcommand");
}

#[test]
fn test_cli_version_command() {
    let output = run_demo(&["--version"]);

    assert!(output.status.success(), "Version command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}

#[test]
fn test_cli_invalid_command() {
    let output = run_demo(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error"), "{stderr}");
}

#[test]
fn test_cli_cluster_help_mentions_workers() {
    let output = run_demo(&["cluster", "--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--workers"), "{stdout}");
}

#[test]
fn test_cli_config_validation_missing_file() {
    let output = run_demo(&["--config", "/nonexistent/bootkit.yaml", "check"]);

    assert!(
        !output.status.success(),
        "Should fail when config file doesn't exist"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "{stderr}");
}

#[test]
fn test_cli_config_validation_invalid_yaml() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(&temp_dir, "invalid: yaml: content: [unclosed");

    let output = run_demo(&["-c", &config_path, "check"]);

    assert!(!output.status.success(), "Should fail with invalid YAML");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"), "{stderr}");
}

#[test]
fn test_cli_config_validation_valid_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r"
logging:
  level: warn
cluster:
  cpus: 2
modules:
  greeter:
    config:
      greeting: hi
      name: bootkit
  heartbeat:
    config:
      interval: 250ms
",
    );

    let output = run_demo(&["--config", &config_path, "check"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "STDOUT: {stdout}\nSTDERR: {stderr}");
    assert!(stdout.contains("Configuration is valid"));
    assert!(stdout.contains("250ms"), "effective config is echoed: {stdout}");
}

#[test]
fn test_cli_check_rejects_bad_module_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r"
modules:
  heartbeat:
    config:
      interval: often
",
    );

    let output = run_demo(&["--config", &config_path, "check"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid heartbeat interval"), "{stderr}");
}

#[test]
fn test_cli_check_rejects_unknown_module_keys() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r"
modules:
  greeter:
    config:
      salutation: hey
",
    );

    let output = run_demo(&["--config", &config_path, "check"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("greeter"), "{stderr}");
}

#[test]
fn test_cli_print_config_applies_env_overrides() {
    let output = Command::new(env!("CARGO_BIN_EXE_bootkit-demo"))
        .arg("--print-config")
        .env("BOOTKIT__CLUSTER__CPUS", "3")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute bootkit-demo");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Effective configuration"), "{stdout}");
    assert!(stdout.contains("cpus: 3"), "{stdout}");
}

#[tokio::test]
async fn test_cli_run_keeps_running_until_stopped() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r"
modules:
  heartbeat:
    config:
      interval: 100ms
",
    );

    let result = run_demo_with_timeout(
        &["--config", &config_path, "run"],
        Duration::from_millis(1500),
    )
    .await;

    match result {
        Err(e) => assert_eq!(e.to_string(), "elapsed", "run should block: {e}"),
        Ok(output) => panic!(
            "run exited early with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

#[tokio::test]
async fn test_cli_run_exits_with_failure_on_module_init_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r"
modules:
  heartbeat:
    config:
      interval: 0s
",
    );

    let output = run_demo_with_timeout(&["--config", &config_path, "run"], Duration::from_secs(10))
        .await
        .expect("run should fail fast");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("heartbeat interval must be positive"), "{stderr}");
}
