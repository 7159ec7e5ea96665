//! Gantry - a declarative task runner
//!
//! Tasks are ordered lists of jobs declared in a `gantry.yaml` manifest. Jobs
//! run through plugins such as `shell` and `watch`, can call other tasks, and
//! share reusable job lists through mixins.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod plugins;
pub mod runner;
pub mod scope;
pub mod ui;

// Re-export commonly used types
pub use error::{GantryError, Result};

/// Current version of Gantry
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
