//! # Snapshot Coordinator
//!
//! Creates, polls and prunes the point-in-time snapshots that hand data
//! between "the volume as it is now" and "what a mover may read or write".
//!
//! Nothing here blocks: [`SnapshotCoordinator::await_ready`] looks once and
//! reports, leaving the requeue to the caller.

use bridge_traits::Clock;
use core_api::{Object, ResourceSpec, VolumeSnapshot, VolumeSnapshotSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::{ProvisionError, Result};
use crate::naming::{owner_labels, Role, LABEL_ROLE};
use crate::provisioner::Provisioner;

#[derive(Clone)]
pub struct SnapshotCoordinator {
    provisioner: Provisioner,
    clock: Arc<dyn Clock>,
}

impl SnapshotCoordinator {
    pub fn new(provisioner: Provisioner, clock: Arc<dyn Clock>) -> Self {
        Self { provisioner, clock }
    }

    /// Request a snapshot of `volume`, or return the one already requested
    /// under `name`.
    #[instrument(skip(self, owner), fields(owner = %owner.name()))]
    pub async fn create_snapshot<O: ResourceSpec>(
        &self,
        owner: &Object<O>,
        volume: &str,
        name: &str,
        class: Option<&str>,
        role: Role,
    ) -> Result<VolumeSnapshot> {
        let spec = VolumeSnapshotSpec {
            source_volume: volume.to_string(),
            volume_snapshot_class_name: class.map(str::to_string),
        };
        let labels = owner_labels(owner.uid(), role);

        let snapshot = self
            .provisioner
            .ensure_volume_snapshot(owner, name, spec, labels)
            .await?;
        debug!(snapshot = %snapshot.name(), ready = snapshot.status.ready_to_use, "Snapshot requested");
        Ok(snapshot)
    }

    /// Check a snapshot once.
    ///
    /// `Ok(false)` means not ready yet, try again later. A snapshot the
    /// platform flagged as failed, or one still not ready `timeout` after its
    /// creation, is an error.
    pub async fn await_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let snapshot = self
            .provisioner
            .client()
            .get::<VolumeSnapshotSpec>(namespace, name)
            .await?
            .ok_or_else(|| ProvisionError::SnapshotNotFound {
                name: format!("{}/{}", namespace, name),
            })?;

        if let Some(message) = &snapshot.status.error {
            return Err(ProvisionError::SnapshotFailed {
                name: name.to_string(),
                message: message.clone(),
            });
        }

        if snapshot.status.ready_to_use {
            return Ok(true);
        }

        if let Some(created) = snapshot.metadata.creation_timestamp {
            let waited = self.clock.now() - created;
            let expired = chrono::Duration::from_std(timeout).map_or(false, |limit| waited > limit);
            if expired {
                return Err(ProvisionError::SnapshotTimeout {
                    name: name.to_string(),
                    waited_secs: waited.num_seconds(),
                });
            }
        }

        Ok(false)
    }

    /// Delete the owner's snapshots of `role` beyond the newest `retain`,
    /// oldest first. `keep` is never deleted and counts towards `retain`.
    ///
    /// Returns the names of the deleted snapshots.
    #[instrument(skip(self, owner), fields(owner = %owner.name()))]
    pub async fn prune<O: ResourceSpec>(
        &self,
        owner: &Object<O>,
        role: Role,
        retain: u32,
        keep: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut snapshots: Vec<VolumeSnapshot> = self
            .provisioner
            .client()
            .list_owned::<VolumeSnapshotSpec>(owner.namespace(), owner.uid())
            .await?
            .into_iter()
            .filter(|s| s.metadata.labels.get(LABEL_ROLE).map(String::as_str) == Some(role.as_str()))
            .collect();

        // Newest first
        snapshots.sort_by(|a, b| {
            b.metadata
                .creation_timestamp
                .cmp(&a.metadata.creation_timestamp)
                .then_with(|| b.metadata.name.cmp(&a.metadata.name))
        });

        let keep_present = keep.map_or(false, |k| snapshots.iter().any(|s| s.name() == k));
        let mut slots = (retain as usize).saturating_sub(usize::from(keep_present));

        let mut doomed = Vec::new();
        for snapshot in &snapshots {
            if Some(snapshot.name()) == keep {
                continue;
            }
            if slots > 0 {
                slots -= 1;
                continue;
            }
            doomed.push(snapshot.metadata.name.clone());
        }

        // Oldest first
        doomed.reverse();
        let mut deleted = Vec::with_capacity(doomed.len());
        for name in doomed {
            if self
                .provisioner
                .release::<O, VolumeSnapshotSpec>(owner, &name)
                .await?
            {
                deleted.push(name);
            }
        }

        if !deleted.is_empty() {
            info!(count = deleted.len(), retain, "Pruned snapshots");
        }
        Ok(deleted)
    }
}
