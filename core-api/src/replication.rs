//! # Replication Resources
//!
//! The two user-facing resource kinds: [`ReplicationSourceSpec`] describes
//! the sending side of a relationship, [`ReplicationDestinationSpec`] the
//! receiving side. Both name a mover backend and carry that backend's
//! parameters in an optional section; only the section matching `mover` is
//! read.
//!
//! ## Example
//!
//! ```json
//! {
//!   "sourcePVC": "database",
//!   "mover": "rsync",
//!   "trigger": { "schedule": "0 * * * *" },
//!   "rsync": { "address": "10.0.0.12", "keySecret": "volrep-rsync-key" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::children::{AccessMode, ServiceType};
use crate::resource::{Object, ResourceSpec};
use crate::status::{DestinationPhase, ReplicationStatus, SourcePhase};

/// Snapshots kept per resource when `retain` is not set.
pub const DEFAULT_RETAIN: u32 = 1;

/// When a replication cycle may start.
///
/// Both fields set means either one firing starts a cycle. Neither set means
/// continuous replication.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Cron expression, `@hourly`-style alias or `@every <duration>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Opaque token; each distinct value requests one cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<String>,
}

/// How a point-in-time copy of a volume is produced for the mover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CopyMethod {
    /// Snapshot the volume, then restore the snapshot into a working volume.
    #[default]
    Snapshot,
    /// Clone the volume directly.
    Clone,
    /// Use the volume as-is.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceVolumeOptions {
    #[serde(default)]
    pub copy_method: CopyMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<AccessMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationVolumeOptions {
    /// `Snapshot` or `Direct`; `Clone` is rejected for destinations.
    #[serde(default)]
    pub copy_method: CopyMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<AccessMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
    /// Existing volume to receive into instead of a provisioned one.
    #[serde(
        rename = "destinationPVC",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub destination_pvc: Option<String>,
}

// ============================================================================
// Mover sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsyncSourceSpec {
    /// Address of the destination's rsync endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Secret holding the pre-shared key published by the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsyncDestinationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Use an existing key secret instead of generating one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RcloneSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
}

/// Snapshot retention forwarded to `restic forget`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResticRetainPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yearly: Option<u32>,
    /// Keep everything newer than this duration, e.g. `3d`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResticSourceSpec {
    /// Secret holding the repository location and password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_interval_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain: Option<ResticRetainPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResticDestinationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Number of backups to skip back from the newest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_as_of: Option<DateTime<Utc>>,
}

// ============================================================================
// Sources and destinations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSourceSpec {
    /// Volume whose content is replicated.
    #[serde(rename = "sourcePVC")]
    pub source_pvc: String,
    /// Registered mover backend name.
    pub mover: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerSpec>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain: Option<u32>,
    #[serde(default)]
    pub volume: SourceVolumeOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsync: Option<RsyncSourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rclone: Option<RcloneSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restic: Option<ResticSourceSpec>,
}

impl ReplicationSourceSpec {
    pub fn retain(&self) -> u32 {
        self.retain.unwrap_or(DEFAULT_RETAIN)
    }
}

impl ResourceSpec for ReplicationSourceSpec {
    const KIND: &'static str = "ReplicationSource";
    type Status = ReplicationStatus<SourcePhase>;
}

pub type ReplicationSource = Object<ReplicationSourceSpec>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestinationSpec {
    pub mover: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerSpec>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain: Option<u32>,
    #[serde(default)]
    pub volume: DestinationVolumeOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsync: Option<RsyncDestinationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rclone: Option<RcloneSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restic: Option<ResticDestinationSpec>,
}

impl ReplicationDestinationSpec {
    pub fn retain(&self) -> u32 {
        self.retain.unwrap_or(DEFAULT_RETAIN)
    }
}

impl ResourceSpec for ReplicationDestinationSpec {
    const KIND: &'static str = "ReplicationDestination";
    type Status = ReplicationStatus<DestinationPhase>;
}

pub type ReplicationDestination = Object<ReplicationDestinationSpec>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_spec_wire_names() {
        let spec: ReplicationSourceSpec = serde_json::from_value(json!({
            "sourcePVC": "database",
            "mover": "rsync",
            "trigger": { "schedule": "@hourly" },
            "volume": { "copyMethod": "Clone", "volumeSnapshotClassName": "csi" },
            "rsync": { "address": "10.0.0.12", "keySecret": "key" }
        }))
        .unwrap();

        assert_eq!(spec.source_pvc, "database");
        assert_eq!(spec.volume.copy_method, CopyMethod::Clone);
        assert_eq!(spec.retain(), DEFAULT_RETAIN);
        assert!(!spec.paused);
        assert_eq!(
            spec.rsync.and_then(|r| r.key_secret),
            Some("key".to_string())
        );
    }

    #[test]
    fn test_destination_pvc_name() {
        let spec: ReplicationDestinationSpec = serde_json::from_value(json!({
            "mover": "restic",
            "retain": 3,
            "volume": { "destinationPVC": "restore-target", "copyMethod": "Direct" },
            "restic": { "repository": "repo", "previous": 1 }
        }))
        .unwrap();

        assert_eq!(spec.retain(), 3);
        assert_eq!(spec.volume.destination_pvc.as_deref(), Some("restore-target"));
        assert_eq!(spec.volume.copy_method, CopyMethod::Direct);
        assert_eq!(spec.restic.and_then(|r| r.previous), Some(1));
    }
}
