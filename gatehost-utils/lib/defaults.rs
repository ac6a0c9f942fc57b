//! Default values and well-known names used across the gatehost project.

use std::{path::PathBuf, sync::LazyLock};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default gatehost home directory, `~/.gatehost`.
pub static DEFAULT_GATEHOST_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gatehost")
});

/// The subdirectory of the gatehost home holding one directory per instance.
pub const INSTANCES_SUBDIR: &str = "instances";

/// The subdirectory of the gatehost home holding per-instance log sinks.
pub const LOG_SUBDIR: &str = "log";

/// The subdirectory of the gatehost home used for staged uploads and
/// transient download archives.
pub const STAGING_SUBDIR: &str = "staging";

/// The filename of the registry database inside the gatehost home.
pub const REGISTRY_DB_FILENAME: &str = "gatehost.db";

/// The filename of the generated router mapping document inside the
/// gatehost home.
pub const ROUTER_CONFIG_FILENAME: &str = "router-config.json";

/// The worker acceptance file forced to an accepted value before every start.
pub const EULA_FILENAME: &str = "eula.txt";

/// The worker properties file seeded at instance creation.
pub const PROPERTIES_FILENAME: &str = "server.properties";

/// The suffix of per-instance log sinks inside [`LOG_SUBDIR`].
pub const LOG_SUFFIX: &str = "log";

/// The port the external router listens on for inbound connections, unless
/// overridden through the environment.
pub const DEFAULT_ROUTER_PORT: u16 = 25565;

/// The lowest port handed out to instances by the allocator.
pub const BASE_INSTANCE_PORT: u16 = 25566;

/// The default executable name of the external TCP router.
pub const DEFAULT_ROUTER_EXE: &str = "mc-router";

/// The default start-command template for a new instance. The `{jar}`
/// placeholder is substituted with the instance's executable name at spawn
/// time.
pub const DEFAULT_START_COMMAND: &str = "java -Xmx1024M -Xms1024M -jar {jar} nogui";
