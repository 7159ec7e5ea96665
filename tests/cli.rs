//! Binary-level tests for the gantry command

#![cfg(unix)]

mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::{create_test_manifest, create_test_manifest_in_subdir, read_output};
use predicates::prelude::*;

const MANIFEST: &str = r#"
tasks:
  build:
    - description: Write the build marker
      plugin: shell
      params:
        command: echo built > out.txt
  fail:
    - plugin: shell
      params:
        command: exit 3
"#;

#[test]
fn test_cli_help() {
    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("ls"))
        .stdout(predicate::str::contains("completions"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn test_cli_version() {
    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gantry"));
}

#[test]
fn test_run_task_with_file() {
    let (dir, manifest_path) = create_test_manifest(MANIFEST);

    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.arg("--file")
        .arg(&manifest_path)
        .args(["run", "build"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Task 'build' ran successfully"));

    assert_eq!(read_output(dir.path(), "out.txt"), "built\n");
}

#[test]
fn test_run_discovers_manifest_from_subdir() {
    let (dir, _manifest_path, sub_dir) = create_test_manifest_in_subdir(MANIFEST);

    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.current_dir(&sub_dir)
        .args(["-q", "run", "build"])
        .assert()
        .success();

    // commands run in the manifest's directory
    assert_eq!(read_output(dir.path(), "out.txt"), "built\n");
}

#[test]
fn test_failing_task_exits_non_zero() {
    let (_dir, manifest_path) = create_test_manifest(MANIFEST);

    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.arg("-f")
        .arg(&manifest_path)
        .args(["run", "fail"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exit code"));
}

#[test]
fn test_missing_task_mentions_manifest() {
    let (_dir, manifest_path) = create_test_manifest(MANIFEST);

    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.arg("-f")
        .arg(&manifest_path)
        .args(["run", "deploy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("deploy"))
        .stderr(predicate::str::contains("gantry.yaml"));
}

#[test]
fn test_missing_manifest_fails() {
    let dir = tempfile::TempDir::new().unwrap();

    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.arg("-f")
        .arg(dir.path().join("gantry.yaml"))
        .arg("ls")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Check if 'gantry.yaml' file exists"));
}

#[test]
fn test_ls_lists_tasks() {
    let (_dir, manifest_path) = create_test_manifest(MANIFEST);

    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.arg("-f")
        .arg(&manifest_path)
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("Write the build marker"))
        .stdout(predicate::str::contains("fail"));
}

#[test]
fn test_completions() {
    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gantry"));
}

#[test]
fn test_clean_removes_plugin_storage() {
    let home = tempfile::TempDir::new().unwrap();
    let plugins = home.path().join("plugins");
    std::fs::create_dir_all(plugins.join("acme")).unwrap();

    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.env("GANTRY_HOME", home.path())
        .arg("clean")
        .assert()
        .success();

    assert!(!plugins.exists());
    assert!(home.path().exists());
}

#[test]
fn test_run_with_non_utf8_environment() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let (dir, manifest_path) = create_test_manifest(MANIFEST);

    let mut cmd = cargo_bin_cmd!("gantry");
    cmd.env("GANTRY_BINARY_VALUE", OsStr::from_bytes(b"\xff\xfe"))
        .arg("-f")
        .arg(&manifest_path)
        .args(["run", "build"])
        .assert()
        .success();

    assert_eq!(read_output(dir.path(), "out.txt"), "built\n");
}
