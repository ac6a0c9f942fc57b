//! Error types for gatehost operations.

use std::path::PathBuf;

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a gatehost-core related operation.
pub type GatehostResult<T> = Result<T, GatehostError>;

/// An error that occurred during a gatehost operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum GatehostError {
    /// No instance with the given identifier exists in the registry.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The resolved path does not exist.
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    /// The requested path escapes the instance's sandbox root.
    #[error("access denied: path escapes the instance root: {0}")]
    AccessDenied(PathBuf),

    /// A lifecycle operation required a live worker process.
    #[error("instance is not running: {0}")]
    NotRunning(String),

    /// An instance with the given name already exists.
    #[error("instance name already taken: {0}")]
    NameTaken(String),

    /// The allocated port collides with an existing allocation.
    #[error("port {0} is already allocated")]
    ConflictingPort(u16),

    /// The stored start command could not be interpreted.
    #[error("invalid start command: {0}")]
    InvalidStartCommand(String),

    /// The external router could not be synchronized or restarted.
    #[error("router error: {0}")]
    RouterError(String),

    /// An error from the gatehost utilities.
    #[error(transparent)]
    Utils(#[from] gatehost_utils::GatehostUtilsError),

    /// An I/O error from the filesystem or a child process.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error from the registry database.
    #[error(transparent)]
    Db(#[from] sqlx::Error),

    /// A JSON serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GatehostError {
    /// Returns true when the error denies access to a path outside the
    /// sandbox root.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, GatehostError::AccessDenied(_))
    }
}
