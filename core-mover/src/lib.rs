//! # Core Mover
//!
//! The pluggable data-mover contract and its registry.
//!
//! ## Overview
//!
//! - [`Mover`]: one cycle's transfer, polled until complete, then cleaned up
//! - [`Builder`]: constructs movers for one backend from a source or destination
//! - [`RegistryBuilder`] / [`Registry`]: name to builder lookup, frozen at startup
//! - [`MoverJob`]: per-cycle job naming and status shared by job-based backends
//!
//! Backends live in their own crates (`mover-rsync`, `mover-rclone`,
//! `mover-restic`) and expose a `register` function taking a
//! [`RegistryBuilder`].

pub mod error;
pub mod job;
pub mod mover;
pub mod registry;

pub use error::{MoverError, Result};
pub use job::{data_mount, JobProgress, MoverJob, DATA_MOUNT_PATH};
pub use mover::{Builder, DataVolume, Mover, MoverContext, MoverResult};
pub use registry::{Registry, RegistryBuilder};
