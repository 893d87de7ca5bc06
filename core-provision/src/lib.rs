//! # Resource Provisioning
//!
//! Idempotent management of the transient objects a replication cycle needs.
//!
//! ## Overview
//!
//! - [`Provisioner`] - create-or-adopt for volumes, secrets, service
//!   accounts, services and mover jobs, always owner-referenced to the
//!   parent resource
//! - [`SnapshotCoordinator`] - snapshot creation, non-blocking readiness
//!   checks and retention pruning
//! - [`naming`] - deterministic, DNS-safe child names and labels
//!
//! The provisioner never deletes anything it does not control. Cleanup on
//! parent deletion is the platform's garbage collector's job.

pub mod error;
pub mod naming;
pub mod provisioner;
pub mod snapshot;

pub use error::{ProvisionError, Result};
pub use naming::Role;
pub use provisioner::Provisioner;
pub use snapshot::SnapshotCoordinator;
