//! Synchronization of the external TCP router.
//!
//! The router is an external binary that accepts inbound connections on one
//! public port and forwards them to the correct backend based on the
//! requested domain. It consumes a declarative JSON mapping file; this module
//! regenerates that file from the registry's route set and coordinates the
//! router restart that makes the new mapping live.
//!
//! Mutations that arrive while a restart is in flight are coalesced: each one
//! still triggers exactly one subsequent resync, with last-writer-wins
//! content, and none is dropped.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use gatehost_utils::{resolve_env_path, DEFAULT_ROUTER_EXE, ROUTER_EXE_ENV_VAR};
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tokio::{fs, process::Command, sync::Mutex, time::sleep};

use crate::{management::db, models::Route, GatehostError, GatehostResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Delay between stopping the old router process and spawning the new one,
/// so the listening port has time to release.
const RESTART_SETTLE: Duration = Duration::from_millis(1500);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The declarative mapping document the external router consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Optional backend for requests whose domain matches no mapping.
    #[serde(rename = "default-server", skip_serializing_if = "Option::is_none")]
    pub default_server: Option<String>,

    /// Domain to `host:port` backend mappings.
    pub mappings: BTreeMap<String, String>,
}

/// Keeps the external router consistent with the registry's route set.
pub struct RouterSync {
    pool: Pool<Sqlite>,
    config_path: PathBuf,
    listen_port: u16,
    process: Mutex<Option<tokio::process::Child>>,
    sync_lock: Mutex<()>,
    dirty: AtomicBool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RouterConfig {
    /// Builds the mapping document from the registry's route set.
    ///
    /// Domains are normalized; a `*` source domain becomes the default
    /// backend instead of a mapping entry.
    pub fn from_routes(routes: &[Route]) -> Self {
        let mut mappings = BTreeMap::new();
        let mut default_server = None;

        for route in routes {
            let backend = format!("{}:{}", route.dest_host, route.dest_port);
            let domain = normalize_domain(&route.source_domain);
            if domain == "*" {
                default_server = Some(backend);
            } else {
                mappings.insert(domain, backend);
            }
        }

        Self {
            default_server,
            mappings,
        }
    }
}

impl RouterSync {
    /// Creates a synchronizer writing its mapping file at the given path and
    /// running a router that listens on the given port.
    pub fn new(pool: Pool<Sqlite>, config_path: PathBuf, listen_port: u16) -> Self {
        Self {
            pool,
            config_path,
            listen_port,
            process: Mutex::new(None),
            sync_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Regenerates the router's mapping file from the registry and restarts
    /// the router process.
    ///
    /// When a sync is already in flight this marks the route set dirty and
    /// returns; the in-flight sync picks the change up before releasing the
    /// lock, so no mutation is left without a subsequent resync.
    pub async fn sync_and_restart(&self) -> GatehostResult<()> {
        self.dirty.store(true, Ordering::SeqCst);

        let Ok(mut guard) = self.sync_lock.try_lock() else {
            return Ok(());
        };

        loop {
            while self.dirty.swap(false, Ordering::SeqCst) {
                self.resync_once().await?;
            }
            drop(guard);

            // A caller may have marked the set dirty after the final swap but
            // before the lock was released, and then lost its try_lock to us.
            // Re-check after the release so that mark is never left undrained.
            if !self.dirty.load(Ordering::SeqCst) {
                return Ok(());
            }
            guard = self.sync_lock.lock().await;
        }
    }

    /// Stops the router process if one is running.
    pub async fn shutdown(&self) {
        let mut process = self.process.lock().await;
        if let Some(mut child) = process.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to stop router process: {}", e);
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Methods: Helpers
    //----------------------------------------------------------------------------------------------

    async fn resync_once(&self) -> GatehostResult<()> {
        let routes = db::list_routes(&self.pool).await?;
        let config = RouterConfig::from_routes(&routes);

        let rendered = serde_json::to_string_pretty(&config)?;
        fs::write(&self.config_path, rendered).await?;
        tracing::info!(
            "wrote router config with {} mappings to {}",
            config.mappings.len(),
            self.config_path.display()
        );

        self.restart_router().await
    }

    /// Terminates any running router process, waits out the settle delay so
    /// the listening port releases, and spawns a fresh router pointed at the
    /// mapping file.
    async fn restart_router(&self) -> GatehostResult<()> {
        let mut process = self.process.lock().await;

        if let Some(mut child) = process.take() {
            if let Some(pid) = child.id() {
                match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => tracing::warn!("failed to terminate old router process: {}", e),
                }
            }
            if let Err(e) = child.wait().await {
                tracing::warn!("failed to await old router process: {}", e);
            }
            sleep(RESTART_SETTLE).await;
        }

        let router_exe = resolve_env_path(ROUTER_EXE_ENV_VAR, DEFAULT_ROUTER_EXE)?;
        let child = Command::new(&router_exe)
            .arg(format!("-mapping={}", self.config_path.display()))
            .arg(format!("-port={}", self.listen_port))
            .spawn()
            .map_err(|e| {
                GatehostError::RouterError(format!(
                    "failed to spawn router {}: {}",
                    router_exe.display(),
                    e
                ))
            })?;

        tracing::info!(
            "started router process {} on port {}",
            router_exe.display(),
            self.listen_port
        );
        *process = Some(child);

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Normalizes a user-entered domain: lower-case, scheme and trailing slash
/// stripped.
fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_lowercase();
    let domain = match domain.split_once("://") {
        Some((_, rest)) => rest,
        None => domain.as_str(),
    };
    domain.trim_end_matches('/').to_string()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
