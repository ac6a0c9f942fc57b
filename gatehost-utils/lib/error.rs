//! Error types for the gatehost utilities.

use std::path::PathBuf;

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a gatehost-utils related operation.
pub type GatehostUtilsResult<T> = Result<T, GatehostUtilsError>;

/// An error that occurred in the gatehost utilities.
#[derive(pretty_error_debug::Debug, Error)]
pub enum GatehostUtilsError {
    /// An error that occurred when validating or normalizing a path.
    #[error("path validation error: {0}")]
    PathValidation(String),

    /// An executable configured through an environment variable does not exist.
    #[error("executable not found at {0}")]
    ExecutableNotFound(PathBuf),

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
