//! Error types for Gantry

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Gantry operations
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry
#[derive(Error, Debug)]
pub enum GantryError {
    /// Manifest-related errors
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Variable expansion errors
    #[error("Expansion error: {0}")]
    Scope(#[from] ScopeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Manifest loading and resolution errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to find manifest file (searched: {0})")]
    NotFound(String),

    #[error("Invalid manifest: {0}")]
    Invalid(String),

    #[error("Task '{0}' is not defined")]
    TaskNotFound(String),

    #[error("Mixin '{0}' is not defined")]
    MixinNotFound(String),

    #[error("Cyclic reference detected: {0}")]
    CyclicReference(String),

    #[error("Cannot import plugin '{0}': external plugins are not supported")]
    UnsupportedImport(String),

    #[error("Failed to read manifest '{path}': {error}")]
    Read { path: PathBuf, error: String },
}

/// Job execution errors
///
/// Every job reports exactly one of these (or success) through its run context.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("failed to start condition command '{command}': {source}")]
    ConditionStart {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("plugin '{0}' is not registered")]
    PluginNotFound(String),

    #[error("failed to initialize plugin '{plugin}': {message}")]
    PluginInit { plugin: String, message: String },

    #[error("failed to start command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("command failed with exit code {0:?}")]
    CommandFailed(Option<i32>),

    #[error("failed to watch '{path}': {message}")]
    Watch { path: PathBuf, message: String },

    #[error("job was cancelled")]
    Cancelled,

    #[error("task '{task}' failed at job #{index} ({job}): {source}")]
    JobFailed {
        task: String,
        /// Position of the failing entry in the task's job list
        index: usize,
        job: String,
        #[source]
        source: Box<ExecutionError>,
    },

    #[error("job finished without reporting a result")]
    ResultAbandoned,

    #[error("job result was already observed")]
    ResultAlreadyObserved,

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Variable expansion errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("variable '{0}' is not defined")]
    UnresolvedVariable(String),

    #[error("invalid placeholder syntax: {0}")]
    InvalidSyntax(String),

    #[error("recursive expansion of variable '{0}'")]
    RecursiveExpansion(String),
}

/// Specialized result type for manifest operations
pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for expansion operations
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

impl ExecutionError {
    /// Whether this error (or the job error it wraps) is a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            ExecutionError::Cancelled => true,
            ExecutionError::JobFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Innermost error, unwrapping nested task failures
    pub fn root_cause(&self) -> &ExecutionError {
        match self {
            ExecutionError::JobFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
