//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service` and the mover backends it bundles).
//! Host applications can depend on `volrep-workspace` and enable the documented
//! features (`rsync`, `rclone`, `restic`, or `all-movers`) without needing to
//! wire each crate individually.

#[cfg(any(feature = "rsync", feature = "rclone", feature = "restic"))]
pub use core_service::*;
