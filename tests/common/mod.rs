//! Common test utilities

#![allow(dead_code)]

use gantry::config::Settings;
use gantry::manifest::parse_manifest;
use gantry::plugins::PluginRegistry;
use gantry::runner::TaskRunner;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Create a temporary directory with a gantry.yaml file
pub fn create_test_manifest(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let manifest_path = temp_dir.path().join("gantry.yaml");
    fs::write(&manifest_path, content).unwrap();
    (temp_dir, manifest_path)
}

/// Create a test manifest with an empty subdirectory next to it
pub fn create_test_manifest_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let (temp_dir, manifest_path) = create_test_manifest(content);
    let sub_dir = temp_dir.path().join("subdir");
    fs::create_dir(&sub_dir).unwrap();
    (temp_dir, manifest_path, sub_dir)
}

/// Runner for a manifest with the built-in plugins, working in `dir`
pub fn create_runner(dir: &Path, yaml: &str) -> TaskRunner {
    let settings = Settings::new(dir);
    TaskRunner::new(
        parse_manifest(yaml).unwrap(),
        Arc::new(settings),
        Arc::new(PluginRegistry::with_builtins()),
    )
}

/// Read a file written by a task, empty if it does not exist
pub fn read_output(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap_or_default()
}
