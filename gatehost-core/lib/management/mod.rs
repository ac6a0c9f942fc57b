//! Central management for instances, processes, routing, and file access.
//!
//! This module is the core of gatehost. It provides:
//! - [`db`] - Registry access on top of SQLite
//! - [`home`] - Layout and initialization of the gatehost home directory
//! - [`supervisor`] - Worker process lifecycle and crash handling
//! - [`router`] - Synchronization of the external TCP router
//! - [`files`] - Sandboxed file access scoped to one instance's tree
//! - [`instance`] - Instance creation, deletion, and settings management

pub mod db;
pub mod files;
pub mod home;
pub mod instance;
pub mod router;
pub mod supervisor;
