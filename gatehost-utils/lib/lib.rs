//! `gatehost_utils` is a library containing general utilities for the gatehost project.
//!
//! It provides the pieces the other gatehost crates share:
//! - Well-known file and directory names for a gatehost home
//! - Environment-variable backed path and port resolution
//! - Path normalization and containment checks used by the sandboxed
//!   file access layer

#![warn(missing_docs)]

mod defaults;
mod env;
mod error;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use env::*;
pub use error::*;
pub use path::*;
