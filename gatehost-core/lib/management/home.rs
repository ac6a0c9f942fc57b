//! Layout and initialization of the gatehost home directory.
//!
//! A gatehost home holds everything the controller owns on disk: one
//! directory per instance, per-instance log sinks, a staging area for
//! uploads and transient download archives, the registry database, and the
//! generated router mapping file.

use std::path::{Path, PathBuf};

use gatehost_utils::{
    INSTANCES_SUBDIR, LOG_SUBDIR, LOG_SUFFIX, REGISTRY_DB_FILENAME, ROUTER_CONFIG_FILENAME,
    STAGING_SUBDIR,
};
use tokio::fs;

use crate::GatehostResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The on-disk layout of a gatehost home directory.
#[derive(Debug, Clone)]
pub struct GatehostHome {
    root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GatehostHome {
    /// Creates a layout rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a layout rooted at the environment-resolved gatehost home.
    pub fn from_env() -> Self {
        Self::new(gatehost_utils::get_gatehost_home_path())
    }

    /// The root of the gatehost home.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory holding one subdirectory per instance.
    pub fn instances_dir(&self) -> PathBuf {
        self.root.join(INSTANCES_SUBDIR)
    }

    /// The private directory tree of a single instance.
    pub fn instance_dir(&self, instance_name: &str) -> PathBuf {
        self.instances_dir().join(instance_name)
    }

    /// The log sink for a single instance, keyed by its public identifier.
    pub fn instance_log(&self, uuid: &str) -> PathBuf {
        self.root.join(LOG_SUBDIR).join(format!("{}.{}", uuid, LOG_SUFFIX))
    }

    /// The staging directory for uploads and transient archives.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_SUBDIR)
    }

    /// The path of the registry database.
    pub fn db_path(&self) -> PathBuf {
        self.root.join(REGISTRY_DB_FILENAME)
    }

    /// The path of the generated router mapping document.
    pub fn router_config_path(&self) -> PathBuf {
        self.root.join(ROUTER_CONFIG_FILENAME)
    }

    /// Creates the directories the home needs, idempotently.
    pub async fn ensure(&self) -> GatehostResult<()> {
        fs::create_dir_all(self.instances_dir()).await?;
        fs::create_dir_all(self.root.join(LOG_SUBDIR)).await?;
        fs::create_dir_all(self.staging_dir()).await?;
        Ok(())
    }
}
