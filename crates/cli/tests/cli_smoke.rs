//! CLI smoke tests for fnbuild.
//!
//! These tests run the binary against small applications that need no
//! external toolchain and verify exit codes and output.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the fnbuild binary, isolated from the caller's env.
fn fnbuild_cmd(dir: &TempDir) -> Command {
  let mut cmd = cargo_bin_cmd!("fnbuild");
  cmd
    .current_dir(dir.path())
    .env_remove("FNBUILD_STATE_DIR")
    .env_remove("FNBUILD_NODE")
    .env_remove("FNBUILD_SUPPORT_DIR")
    .env_remove("FNBUILD_CHECKS")
    .env_remove("RUST_LOG");
  cmd
}

fn write_file(dir: &TempDir, relative_path: &str, content: &str) {
  let path = dir.path().join(relative_path);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

/// An application with one Python function; no build step, no toolchain.
fn python_app() -> TempDir {
  let temp = TempDir::new().unwrap();
  write_file(
    &temp,
    "fnbuild.json",
    r#"{ "functions": [{ "id": "api", "runtime": "python3.11", "srcPath": "", "handler": "api.handler" }] }"#,
  );
  write_file(&temp, "api.py", "def handler(event, context):\n    return {}\n");
  temp
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  let temp = TempDir::new().unwrap();
  fnbuild_cmd(&temp)
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  let temp = TempDir::new().unwrap();
  fnbuild_cmd(&temp)
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("fnbuild"));
}

#[test]
fn subcommand_help_lists_options() {
  let temp = TempDir::new().unwrap();
  fnbuild_cmd(&temp)
    .args(["watch", "--help"])
    .assert()
    .success()
    .stdout(predicate::str::contains("--debounce"));
}

// =============================================================================
// App file
// =============================================================================

#[test]
fn missing_app_file_fails() {
  let temp = TempDir::new().unwrap();
  fnbuild_cmd(&temp)
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to read app file"));
}

#[test]
fn unknown_function_id_fails() {
  let temp = python_app();
  fnbuild_cmd(&temp)
    .args(["build", "--id", "missing"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("No function with id 'missing'"));
}

// =============================================================================
// Commands
// =============================================================================

#[test]
fn build_without_build_step_succeeds() {
  let temp = python_app();
  fnbuild_cmd(&temp)
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built api"));
}

#[test]
fn build_json_output_is_valid() {
  let temp = python_app();
  let output = fnbuild_cmd(&temp).args(["build", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(reports[0]["id"], "api");
  assert_eq!(reports[0]["issues"], serde_json::json!([]));
}

#[test]
fn unknown_runtime_fails_build() {
  let temp = TempDir::new().unwrap();
  write_file(
    &temp,
    "fnbuild.json",
    r#"{ "functions": [{ "id": "api", "runtime": "unknown-runtime-123", "srcPath": "", "handler": "index.handler" }] }"#,
  );
  fnbuild_cmd(&temp)
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown runtime: unknown-runtime-123"));
}

#[test]
fn bundle_writes_artifact_and_digest() {
  let temp = python_app();
  let output = fnbuild_cmd(&temp).args(["bundle", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(reports[0]["output"]["directory"]["handler"], "api.handler");
  assert_eq!(reports[0]["digest"].as_str().unwrap().len(), 64);
  assert!(temp.path().join(".fnbuild/artifacts/api/api.py").exists());
}

#[test]
fn repeated_bundles_have_same_digest() {
  let temp = python_app();
  let digest = |temp: &TempDir| {
    let output = fnbuild_cmd(temp).args(["bundle", "-o", "json"]).output().unwrap();
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    reports[0]["digest"].as_str().unwrap().to_string()
  };

  assert_eq!(digest(&temp), digest(&temp));
}

#[test]
fn check_without_checks_reports_nothing_to_do() {
  let temp = python_app();
  fnbuild_cmd(&temp)
    .arg("check")
    .assert()
    .success()
    .stdout(predicate::str::contains("No checks to run"));
}

#[test]
fn invalid_check_kind_is_rejected() {
  let temp = python_app();
  fnbuild_cmd(&temp)
    .args(["check", "--kind", "format"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown check"));
}
