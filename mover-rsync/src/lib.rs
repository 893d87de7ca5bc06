//! # Rsync Mover
//!
//! Point-to-point replication over rsync with a pre-shared key.
//!
//! ## Overview
//!
//! The destination side listens: it owns a key secret, a service that
//! exposes the listener and one listening job per cycle. It publishes
//! `{address, port, keySecret}` in its status so the source can be pointed at
//! it. The source side runs one pushing job per cycle against that address.
//!
//! ```text
//! ReplicationSource ── job (push) ──> Service ──> job (listen) ── ReplicationDestination
//!                        │                                  │
//!                        └──────── key secret (psk) ────────┘
//! ```

mod destination;
mod source;

use core_api::{ReplicationDestination, ReplicationSource};
use core_mover::{Builder, DataVolume, Mover, MoverContext, MoverError, RegistryBuilder, Result};
use std::sync::Arc;

pub use destination::RsyncDestinationMover;
pub use source::RsyncSourceMover;

pub const MOVER_NAME: &str = "rsync";

/// Port the listener binds when the spec does not set one.
pub const DEFAULT_PORT: u16 = 8000;

/// Key in the key secret holding the pre-shared key.
pub const PSK_KEY: &str = "psk.txt";

/// Register the rsync backend.
pub fn register(registry: &mut RegistryBuilder) -> Result<()> {
    registry.register(Arc::new(RsyncBuilder))
}

#[derive(Debug, Default)]
pub struct RsyncBuilder;

impl Builder for RsyncBuilder {
    fn name(&self) -> &'static str {
        MOVER_NAME
    }

    fn version_info(&self) -> String {
        format!("rsync-over-psk ({})", env!("CARGO_PKG_VERSION"))
    }

    fn from_source(
        &self,
        ctx: &MoverContext,
        source: &ReplicationSource,
        data: DataVolume,
    ) -> Result<Box<dyn Mover>> {
        let spec = source
            .spec
            .rsync
            .as_ref()
            .ok_or_else(|| MoverError::invalid_spec(MOVER_NAME, "missing rsync section"))?;

        let address = spec
            .address
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| MoverError::invalid_spec(MOVER_NAME, "address is required"))?;
        let key_secret = spec
            .key_secret
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MoverError::invalid_spec(MOVER_NAME, "keySecret is required"))?;

        Ok(Box::new(RsyncSourceMover::new(
            ctx,
            source,
            data,
            address,
            spec.port.unwrap_or(DEFAULT_PORT),
            key_secret,
        )))
    }

    fn from_destination(
        &self,
        ctx: &MoverContext,
        destination: &ReplicationDestination,
        data: DataVolume,
    ) -> Result<Box<dyn Mover>> {
        let spec = destination.spec.rsync.clone().unwrap_or_default();
        Ok(Box::new(RsyncDestinationMover::new(
            ctx,
            destination,
            data,
            spec,
        )))
    }
}
