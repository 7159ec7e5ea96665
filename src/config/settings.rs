//! Runtime settings
//!
//! Everything the runner needs to know about its surroundings, built once per
//! invocation and shared with every job.

use crate::config::storage::Storage;
use crate::scope::Vars;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Name of the optional environment file next to the manifest
pub const ENV_FILE_NAME: &str = ".env";

/// Default shell and the flag it takes before a command string
pub fn default_shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

/// Collect environment entries, skipping those that are not valid UTF-8
pub fn environment_from<I>(vars: I) -> Vars
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                debug!(
                    variable = %key.unwrap_or_else(|k| k.to_string_lossy().into_owned()),
                    "skipping environment variable that is not valid UTF-8"
                );
                None
            }
        })
        .collect()
}

/// Snapshot of the process environment
pub fn process_environment() -> Vars {
    environment_from(env::vars_os())
}

/// Settings for one gantry invocation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root; default working directory for commands
    pub project_dir: PathBuf,

    /// Manifest file path
    pub manifest_path: Option<PathBuf>,

    /// Shell binary used for commands and conditions
    pub shell: String,

    /// Shell flag preceding the command string
    pub shell_exec_param: String,

    /// Environment layer for variable expansion and child processes
    pub environment: Arc<Vars>,

    /// Plugin storage
    pub storage: Storage,
}

impl Settings {
    /// Create settings for a project directory, inheriting the process environment
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let (shell, param) = default_shell();
        let storage =
            Storage::from_env().unwrap_or_else(|_| Storage::new(project_dir.join(".gantry")));

        Settings {
            project_dir,
            manifest_path: None,
            shell: shell.to_string(),
            shell_exec_param: param.to_string(),
            environment: Arc::new(process_environment()),
            storage,
        }
    }

    /// Set the manifest path; the project directory becomes its parent
    pub fn with_manifest_path(mut self, path: PathBuf) -> Self {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.project_dir = parent.to_path_buf();
        }
        self.manifest_path = Some(path);
        self
    }

    /// Replace the environment layer
    pub fn with_environment(mut self, environment: Vars) -> Self {
        self.environment = Arc::new(environment);
        self
    }

    /// Set the shell used for commands
    pub fn with_shell(mut self, shell: impl Into<String>, exec_param: impl Into<String>) -> Self {
        self.shell = shell.into();
        self.shell_exec_param = exec_param.into();
        self
    }

    /// Overlay variables from an environment file, if it exists
    pub fn with_env_file(mut self, path: &Path) -> Result<Self, dotenvy::Error> {
        if !path.is_file() {
            return Ok(self);
        }

        let mut environment = (*self.environment).clone();
        for item in dotenvy::from_path_iter(path)? {
            let (key, value) = item?;
            environment.insert(key, value);
        }
        debug!(path = %path.display(), "loaded environment file");

        self.environment = Arc::new(environment);
        Ok(self)
    }

    /// Directory containing the manifest (or the project directory)
    pub fn manifest_dir(&self) -> PathBuf {
        self.manifest_path
            .as_ref()
            .and_then(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.project_dir.clone())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_new() {
        let settings = Settings::new("/project");
        assert_eq!(settings.project_dir, PathBuf::from("/project"));
        assert_eq!(
            (settings.shell.as_str(), settings.shell_exec_param.as_str()),
            default_shell()
        );
        assert!(settings.manifest_path.is_none());
    }

    #[test]
    fn test_manifest_path_sets_project_dir() {
        let settings =
            Settings::new("/elsewhere").with_manifest_path(PathBuf::from("/work/app/gantry.yaml"));
        assert_eq!(settings.project_dir, PathBuf::from("/work/app"));
        assert_eq!(settings.manifest_dir(), PathBuf::from("/work/app"));
    }

    #[test]
    fn test_env_file_overlays_environment() {
        let temp_dir = TempDir::new().unwrap();
        let env_file = temp_dir.path().join(ENV_FILE_NAME);
        fs::write(&env_file, "GREETING=hi\nTARGET=dotenv\n").unwrap();

        let mut base = Vars::new();
        base.insert("TARGET".to_string(), "process".to_string());
        base.insert("KEEP".to_string(), "yes".to_string());

        let settings = Settings::new(temp_dir.path())
            .with_environment(base)
            .with_env_file(&env_file)
            .unwrap();

        assert_eq!(settings.environment["GREETING"], "hi");
        assert_eq!(settings.environment["TARGET"], "dotenv");
        assert_eq!(settings.environment["KEEP"], "yes");
    }

    #[cfg(unix)]
    #[test]
    fn test_environment_skips_non_utf8_entries() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("GOOD"), OsString::from("yes")),
            (OsString::from("BAD_VALUE"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from_vec(vec![0xff]), OsString::from("bad key")),
        ];

        let environment = environment_from(vars);
        assert_eq!(environment.len(), 1);
        assert_eq!(environment["GOOD"], "yes");
    }

    #[test]
    fn test_missing_env_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::new(temp_dir.path())
            .with_environment(Vars::new())
            .with_env_file(&temp_dir.path().join(ENV_FILE_NAME))
            .unwrap();
        assert!(settings.environment.is_empty());
    }
}
