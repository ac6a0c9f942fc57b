//! Registry models and plain data structures returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle status of an instance as persisted in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// The worker process is not running.
    Stopped,

    /// The worker process is running.
    Running,

    /// The worker crashed and the supervisor is about to retry.
    Restarting,

    /// The worker crashed repeatedly and the retry budget is exhausted.
    Crashed,
}

/// A managed worker registered in the registry.
///
/// The numeric `id` is internal to the registry; callers address instances
/// through the opaque `uuid`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Instance {
    /// Internal registry key.
    pub id: i64,

    /// Opaque public identifier.
    pub uuid: String,

    /// Unique human-readable name; doubles as the instance directory name.
    pub name: String,

    /// Public domain the router maps to this instance.
    pub domain: String,

    /// Internal loopback port allocated to this instance.
    pub port: i64,

    /// Filename of the executable artifact inside the instance directory.
    pub jar_file: String,

    /// Start-command template with a `{jar}` substitution placeholder.
    pub start_command: String,

    /// Persisted lifecycle status.
    pub status: InstanceStatus,

    /// OS process id of the worker while running.
    pub pid: Option<i64>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A domain-to-backend mapping consumed by the external router.
///
/// Routes are derived state: exactly one route exists per instance and they
/// are never created or deleted independently of it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Route {
    /// Internal registry key.
    pub id: i64,

    /// The domain inbound connections request.
    pub source_domain: String,

    /// The router's single external listening port.
    pub listening_port: i64,

    /// Backend host, the instance's loopback address.
    pub dest_host: String,

    /// Backend port, equal to the instance's allocated port.
    pub dest_port: i64,

    /// Free-text description.
    pub description: String,
}

/// A directory entry returned by the file facade's list operation.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    /// Entry name within its parent directory.
    pub name: String,

    /// Whether the entry is a directory.
    pub is_dir: bool,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

/// A caller-staged file handed to upload operations: a local temp path plus
/// the original filename it should keep at its destination.
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Local path of the staged content.
    pub path: PathBuf,

    /// Original filename supplied by the uploader.
    pub name: String,
}

/// The outcome of a download request.
#[derive(Debug, Clone)]
pub struct Download {
    /// Path of the file to hand to the caller.
    pub path: PathBuf,

    /// Suggested filename for the transfer.
    pub name: String,

    /// True when `path` is a synthesized archive the caller should delete
    /// after the transfer completes.
    pub transient: bool,
}

/// Live status of an instance as observed by the supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct LiveStatus {
    /// Opaque public identifier.
    pub uuid: String,

    /// Whether a live process handle exists for the instance.
    pub running: bool,

    /// OS process id of the live worker, when running.
    pub pid: Option<u32>,
}
