//! # Restic Mover
//!
//! Backup and restore through a restic repository.
//!
//! ## Overview
//!
//! - Source: `restic backup` of the data volume, followed by
//!   `restic forget --prune` when the last prune is older than
//!   `pruneIntervalDays` (default 7). The prune time is kept in
//!   `status.restic.lastPruned`.
//! - Destination: `restic restore` into the data volume, optionally of an
//!   older backup (`previous`) or the newest one not after `restoreAsOf`.
//!
//! The `repository` secret carries the repository location and password; it
//! is mounted into the job, never read by the controller.

mod destination;
mod source;

use core_api::{ReplicationDestination, ReplicationSource};
use core_mover::{Builder, DataVolume, Mover, MoverContext, MoverError, RegistryBuilder, Result};
use std::sync::Arc;

pub use destination::ResticDestinationMover;
pub use source::{forget_options, ResticSourceMover};

pub const MOVER_NAME: &str = "restic";

/// Days between prunes when `pruneIntervalDays` is not set.
pub const DEFAULT_PRUNE_INTERVAL_DAYS: u32 = 7;

const REPOSITORY_MOUNT_PATH: &str = "/restic-repository";
const CACHE_DIR: &str = "/tmp/restic-cache";

/// Register the restic backend.
pub fn register(registry: &mut RegistryBuilder) -> Result<()> {
    registry.register(Arc::new(ResticBuilder))
}

#[derive(Debug, Default)]
pub struct ResticBuilder;

fn repository(value: Option<&String>) -> Result<String> {
    value
        .filter(|r| !r.is_empty())
        .cloned()
        .ok_or_else(|| MoverError::invalid_spec(MOVER_NAME, "repository is required"))
}

impl Builder for ResticBuilder {
    fn name(&self) -> &'static str {
        MOVER_NAME
    }

    fn version_info(&self) -> String {
        format!("restic backup/restore ({})", env!("CARGO_PKG_VERSION"))
    }

    fn from_source(
        &self,
        ctx: &MoverContext,
        source: &ReplicationSource,
        data: DataVolume,
    ) -> Result<Box<dyn Mover>> {
        let spec = source
            .spec
            .restic
            .clone()
            .ok_or_else(|| MoverError::invalid_spec(MOVER_NAME, "missing restic section"))?;
        let repository = repository(spec.repository.as_ref())?;
        if spec.prune_interval_days == Some(0) {
            return Err(MoverError::invalid_spec(
                MOVER_NAME,
                "pruneIntervalDays must be at least 1",
            ));
        }

        Ok(Box::new(ResticSourceMover::new(
            ctx, source, data, repository, spec,
        )))
    }

    fn from_destination(
        &self,
        ctx: &MoverContext,
        destination: &ReplicationDestination,
        data: DataVolume,
    ) -> Result<Box<dyn Mover>> {
        let spec = destination
            .spec
            .restic
            .clone()
            .ok_or_else(|| MoverError::invalid_spec(MOVER_NAME, "missing restic section"))?;
        let repository = repository(spec.repository.as_ref())?;

        Ok(Box::new(ResticDestinationMover::new(
            ctx,
            destination,
            data,
            repository,
            spec,
        )))
    }
}
