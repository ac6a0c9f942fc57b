//! Command line argument types for the `gatehost` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Arguments of the `gatehost` binary.
#[derive(Debug, Parser)]
#[command(name = "gatehost", author, about = "Manage a fleet of game-server workers behind a domain router", version)]
pub struct GatehostArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: GatehostSubcommand,
}

/// Subcommands of the `gatehost` binary.
#[derive(Debug, Subcommand)]
pub enum GatehostSubcommand {
    /// Create a new instance from an executable artifact
    Create {
        /// Unique instance name
        #[arg(long)]
        name: String,

        /// Public domain to route to the instance
        #[arg(long)]
        domain: String,

        /// Path to the executable artifact to install
        #[arg(long)]
        jar: PathBuf,

        /// Start-command template; `{jar}` is substituted with the artifact name
        #[arg(long)]
        start_command: Option<String>,
    },

    /// List registered instances and their status
    List,

    /// Start registered instances (all, or the given identifiers) and
    /// supervise them until SIGINT/SIGTERM
    Up {
        /// Identifiers of the instances to bring up; all when omitted
        uuids: Vec<String>,
    },

    /// Send a graceful stop signal to a running instance's worker
    Stop {
        /// Identifier of the instance
        uuid: String,
    },

    /// Delete an instance, its route, and its on-disk tree
    Delete {
        /// Identifier of the instance
        uuid: String,
    },

    /// Print the tail of an instance's log
    Logs {
        /// Identifier of the instance
        uuid: String,
    },

    /// Regenerate the router config from the registry and restart the router
    Sync,
}
