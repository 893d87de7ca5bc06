//! # Rclone Mover
//!
//! Replication through any object store rclone can reach. The source pushes
//! the data volume to `configSection:destPath`, the destination pulls it
//! back. Both sides read the rclone configuration from `configSecret`.

mod mover;

use core_api::{RcloneSpec, ReplicationDestination, ReplicationSource};
use core_mover::{Builder, DataVolume, Mover, MoverContext, MoverError, RegistryBuilder, Result};
use core_provision::Role;
use std::sync::Arc;

pub use mover::{Direction, RcloneMover, RcloneTarget};

pub const MOVER_NAME: &str = "rclone";

/// Register the rclone backend.
pub fn register(registry: &mut RegistryBuilder) -> Result<()> {
    registry.register(Arc::new(RcloneBuilder))
}

#[derive(Debug, Default)]
pub struct RcloneBuilder;

/// Check the rclone section and pull out its required fields.
fn target(spec: Option<&RcloneSpec>) -> Result<RcloneTarget> {
    let spec = spec.ok_or_else(|| MoverError::invalid_spec(MOVER_NAME, "missing rclone section"))?;

    let required = |value: &Option<String>, field: &str| {
        value
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MoverError::invalid_spec(MOVER_NAME, format!("{} is required", field)))
    };

    Ok(RcloneTarget {
        config_secret: required(&spec.config_secret, "configSecret")?,
        config_section: required(&spec.config_section, "configSection")?,
        dest_path: required(&spec.dest_path, "destPath")?,
    })
}

impl Builder for RcloneBuilder {
    fn name(&self) -> &'static str {
        MOVER_NAME
    }

    fn version_info(&self) -> String {
        format!("rclone sync ({})", env!("CARGO_PKG_VERSION"))
    }

    fn from_source(
        &self,
        ctx: &MoverContext,
        source: &ReplicationSource,
        data: DataVolume,
    ) -> Result<Box<dyn Mover>> {
        let target = target(source.spec.rclone.as_ref())?;
        Ok(Box::new(RcloneMover::new(
            ctx,
            source,
            Role::Source,
            Direction::Push,
            data,
            target,
        )))
    }

    fn from_destination(
        &self,
        ctx: &MoverContext,
        destination: &ReplicationDestination,
        data: DataVolume,
    ) -> Result<Box<dyn Mover>> {
        let target = target(destination.spec.rclone.as_ref())?;
        Ok(Box::new(RcloneMover::new(
            ctx,
            destination,
            Role::Destination,
            Direction::Pull,
            data,
            target,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_requires_every_field() {
        assert!(target(None).is_err());

        let partial = RcloneSpec {
            config_secret: Some("rclone-conf".to_string()),
            config_section: Some("s3".to_string()),
            dest_path: None,
        };
        let err = target(Some(&partial)).unwrap_err();
        assert_eq!(err.reason(), "InvalidSpec");
        assert!(err.to_string().contains("destPath"));

        let empty_section = RcloneSpec {
            config_section: Some(String::new()),
            ..partial.clone()
        };
        assert!(target(Some(&empty_section)).is_err());

        let full = RcloneSpec {
            dest_path: Some("bucket/db".to_string()),
            ..partial
        };
        let target = target(Some(&full)).unwrap();
        assert_eq!(target.remote(), "s3:bucket/db");
    }

    #[test]
    fn test_register() {
        let mut registry = RegistryBuilder::new();
        register(&mut registry).unwrap();
        assert!(registry.build().lookup(MOVER_NAME).is_some());
    }
}
