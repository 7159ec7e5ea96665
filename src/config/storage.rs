//! Plugin artifact storage
//!
//! Resolves where downloaded plugins live. The root comes from `GANTRY_HOME`
//! when set, otherwise `~/.gantry`.

use directories::BaseDirs;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable overriding the storage root
pub const STORAGE_VAR_NAME: &str = "GANTRY_HOME";

/// Directory name used under the home directory
const HOME_DIR_NAME: &str = ".gantry";

/// Area of the storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Root,
    Plugins,
}

impl StorageKind {
    fn dir_name(self) -> &'static str {
        match self {
            StorageKind::Root => "",
            StorageKind::Plugins => "plugins",
        }
    }
}

/// Storage locations for one gantry installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Storage rooted at an explicit directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Storage { root: root.into() }
    }

    /// Resolve the storage root from the environment
    pub fn from_env() -> io::Result<Self> {
        Self::resolve(env::var(STORAGE_VAR_NAME).ok())
    }

    /// Resolve the storage root, preferring an explicit override
    pub fn resolve(override_dir: Option<String>) -> io::Result<Self> {
        if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
            return Ok(Storage::new(dir));
        }

        let dirs = BaseDirs::new().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "failed to get storage directory: home directory is unknown",
            )
        })?;
        Ok(Storage::new(dirs.home_dir().join(HOME_DIR_NAME)))
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an item in the storage
    pub fn path(&self, kind: StorageKind, parts: &[&str]) -> PathBuf {
        let mut path = self.root.join(kind.dir_name());
        for part in parts {
            path.push(part);
        }
        path
    }

    /// Path of an item, creating the directory if it does not exist
    pub fn ensure_path(&self, kind: StorageKind, parts: &[&str]) -> io::Result<PathBuf> {
        let path = self.path(kind, parts);
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        Ok(path)
    }

    /// Check if an item exists in the storage
    pub fn exists(&self, kind: StorageKind, parts: &[&str]) -> bool {
        self.path(kind, parts).exists()
    }

    /// Remove an item from the storage; missing items are not an error
    pub fn delete(&self, kind: StorageKind, parts: &[&str]) -> io::Result<()> {
        let path = self.path(kind, parts);
        if !path.exists() {
            return Ok(());
        }
        if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}
