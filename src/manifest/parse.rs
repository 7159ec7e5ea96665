//! Manifest file parsing and discovery

use crate::error::{GantryError, ManifestError, ManifestResult};
use crate::manifest::types::Manifest;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Manifest file names to search for
pub const MANIFEST_FILE_NAMES: &[&str] = &["gantry.yaml", "gantry.yml"];

/// Find the manifest by searching the current and parent directories
pub fn find_manifest_file() -> ManifestResult<PathBuf> {
    find_manifest_file_from(env::current_dir().map_err(|e| {
        ManifestError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the manifest starting from a specific directory
pub fn find_manifest_file_from(start_dir: PathBuf) -> ManifestResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in MANIFEST_FILE_NAMES {
            let manifest_path = current_dir.join(file_name);
            searched_paths.push(manifest_path.display().to_string());

            if manifest_path.is_file() {
                return Ok(manifest_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ManifestError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse a manifest file from a path
pub fn parse_manifest_file(path: &Path) -> Result<Manifest, GantryError> {
    let contents = fs::read_to_string(path).map_err(|e| ManifestError::Read {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    parse_manifest(&contents)
}

/// Parse a manifest from a string
pub fn parse_manifest(yaml: &str) -> Result<Manifest, GantryError> {
    if yaml.trim().is_empty() {
        return Ok(Manifest::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

/// Parse the manifest with automatic file discovery
pub fn parse_manifest_auto() -> Result<(Manifest, PathBuf), GantryError> {
    let manifest_path = find_manifest_file()?;
    let manifest = parse_manifest_file(&manifest_path)?;
    Ok((manifest, manifest_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SIMPLE: &str = r#"
tasks:
  test:
    - plugin: shell
      params:
        command: echo "test"
"#;

    #[test]
    fn test_parse_simple_manifest() {
        let manifest = parse_manifest(SIMPLE).unwrap();
        assert_eq!(manifest.tasks.len(), 1);
        assert!(manifest.tasks.contains_key("test"));
    }

    #[test]
    fn test_parse_empty_manifest() {
        let manifest = parse_manifest("  \n").unwrap();
        assert!(manifest.tasks.is_empty());
    }

    #[test]
    fn test_find_manifest_in_current_dir() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("gantry.yaml");
        fs::write(&manifest_path, SIMPLE).unwrap();

        let found = find_manifest_file_from(temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(found, manifest_path);
    }

    #[test]
    fn test_find_manifest_in_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("gantry.yml");
        let sub_dir = temp_dir.path().join("subdir");

        fs::create_dir(&sub_dir).unwrap();
        fs::write(&manifest_path, SIMPLE).unwrap();

        let found = find_manifest_file_from(sub_dir).unwrap();
        assert_eq!(found, manifest_path);
    }

    #[test]
    fn test_manifest_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let result = find_manifest_file_from(temp_dir.path().to_path_buf());
        assert!(matches!(result, Err(ManifestError::NotFound(_))));
    }

    #[test]
    fn test_parse_manifest_with_vars_and_plugins() {
        let yaml = r#"
vars:
  out: ./build
plugins:
  - github://example/plugin-${out}
tasks:
  hello:
    - plugin: shell
"#;
        let manifest = parse_manifest(yaml).unwrap();
        assert_eq!(manifest.vars["out"], "./build");
        assert_eq!(manifest.plugins, vec!["github://example/plugin-${out}"]);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_manifest("tasks: [unclosed");
        assert!(matches!(result, Err(GantryError::Yaml(_))));
    }
}
