//! Runtime configuration
//!
//! Settings describing the project and shell, and the plugin storage layout.

pub mod settings;
pub mod storage;

// Re-export main types
pub use settings::*;
pub use storage::*;
