//! Utility functions for working with environment variables.

use std::path::{Path, PathBuf};

use crate::{
    GatehostUtilsError, GatehostUtilsResult, DEFAULT_GATEHOST_HOME, DEFAULT_ROUTER_PORT,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the gatehost home directory
pub const GATEHOST_HOME_ENV_VAR: &str = "GATEHOST_HOME";

/// Environment variable for the external router binary path
pub const ROUTER_EXE_ENV_VAR: &str = "GATEHOST_ROUTER_EXE";

/// Environment variable for the external router's listening port
pub const ROUTER_PORT_ENV_VAR: &str = "GATEHOST_ROUTER_PORT";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the path to the gatehost home directory.
/// If the GATEHOST_HOME environment variable is set, returns that path.
/// Otherwise, returns the default gatehost home path.
pub fn get_gatehost_home_path() -> PathBuf {
    if let Ok(gatehost_home) = std::env::var(GATEHOST_HOME_ENV_VAR) {
        PathBuf::from(gatehost_home)
    } else {
        DEFAULT_GATEHOST_HOME.to_owned()
    }
}

/// Returns the port the external router listens on.
/// If the GATEHOST_ROUTER_PORT environment variable is set and parses as a
/// port number, returns that value. Otherwise, returns the default.
pub fn get_router_port() -> u16 {
    std::env::var(ROUTER_PORT_ENV_VAR)
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(DEFAULT_ROUTER_PORT)
}

/// Resolves an executable path from an environment variable, falling back to
/// the given default when the variable is not set.
///
/// When the resolved value contains a path separator it must name an existing
/// file; a bare program name is returned as-is and resolved through `PATH` by
/// the spawner.
pub fn resolve_env_path(env_var: &str, default: impl AsRef<Path>) -> GatehostUtilsResult<PathBuf> {
    let path = match std::env::var(env_var) {
        Ok(value) => PathBuf::from(value),
        Err(_) => default.as_ref().to_path_buf(),
    };

    if path.components().count() > 1 && !path.exists() {
        return Err(GatehostUtilsError::ExecutableNotFound(path));
    }

    Ok(path)
}
