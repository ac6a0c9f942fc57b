//! `gatehost` operates a small multi-tenant fleet of long-running game-server
//! worker processes on a single host, exposing each one under an independent
//! network domain through an external TCP-routing binary.
//!
//! # Overview
//!
//! gatehost covers three subsystems:
//!
//! - **Process supervision**: starting, gracefully stopping and monitoring
//!   worker processes, with crash detection and a bounded auto-restart policy
//! - **Router synchronization**: keeping the external router's declarative
//!   mapping file consistent with the registered set of instances, and
//!   coordinating router restarts
//! - **Sandboxed file access**: exposing each instance's private directory
//!   tree while provably preventing escapes outside of it
//!
//! Durable state lives in a SQLite registry; the supervisor exclusively owns
//! the in-memory table of live process handles.
//!
//! # Modules
//!
//! - [`cli`] - Command line argument types for the `gatehost` binary
//! - [`management`] - Registry, supervisor, router sync, file facade, and
//!   instance lifecycle management
//! - [`models`] - Registry models and status types

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod management;
pub mod models;

pub use error::*;
