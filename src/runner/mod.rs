//! Task execution engine
//!
//! This module handles running tasks: run contexts and their cancellation
//! tree, job conditions, and the orchestrator dispatching jobs to plugins.

pub mod condition;
pub mod context;
pub mod task;

// Re-export main types
pub use condition::*;
pub use context::*;
pub use task::*;
