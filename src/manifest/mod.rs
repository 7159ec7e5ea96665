//! Manifest parsing, validation and job resolution
//!
//! This module handles gantry.yaml files: decoding them, checking their
//! structure, and turning task names into executable job lists.

pub mod parse;
pub mod resolve;
pub mod schema;
pub mod types;

// Re-export main types
pub use parse::*;
pub use resolve::ResolvedJob;
pub use schema::*;
pub use types::*;
