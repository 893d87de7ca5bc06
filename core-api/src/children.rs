//! # Child Resource Kinds
//!
//! The transient objects a replication cycle needs: working volumes,
//! snapshots, credentials, service identities, network endpoints and mover
//! jobs. The platform fills in their status (volume binding, snapshot
//! readiness, service addresses, job outcome); the core only reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resource::{Object, ResourceSpec};

/// Volume access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

/// Reference to another object in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedLocalObjectReference {
    pub kind: String,
    pub name: String,
}

impl TypedLocalObjectReference {
    pub fn snapshot(name: impl Into<String>) -> Self {
        Self {
            kind: VolumeSnapshotSpec::KIND.to_string(),
            name: name.into(),
        }
    }

    pub fn volume(name: impl Into<String>) -> Self {
        Self {
            kind: VolumeSpec::KIND.to_string(),
            name: name.into(),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind == VolumeSnapshotSpec::KIND
    }
}

// ============================================================================
// Volumes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<AccessMode>,
    /// Snapshot or volume the new volume is populated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<TypedLocalObjectReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumePhase {
    Pending,
    Bound,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<VolumePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
}

impl ResourceSpec for VolumeSpec {
    const KIND: &'static str = "PersistentVolumeClaim";
    type Status = VolumeStatus;
}

pub type Volume = Object<VolumeSpec>;

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    pub source_volume: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default)]
    pub ready_to_use: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceSpec for VolumeSnapshotSpec {
    const KIND: &'static str = "VolumeSnapshot";
    type Status = VolumeSnapshotStatus;
}

pub type VolumeSnapshot = Object<VolumeSnapshotSpec>;

// ============================================================================
// Credentials and identities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecretSpec {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ResourceSpec for SecretSpec {
    const KIND: &'static str = "Secret";
    type Status = ();
}

pub type Secret = Object<SecretSpec>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceAccountSpec {}

impl ResourceSpec for ServiceAccountSpec {
    const KIND: &'static str = "ServiceAccount";
    type Status = ();
}

pub type ServiceAccount = Object<ServiceAccountSpec>;

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    LoadBalancer,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    pub port: u16,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_address: Option<String>,
}

impl ResourceSpec for ServiceSpec {
    const KIND: &'static str = "Service";
    type Status = ServiceStatus;
}

pub type Service = Object<ServiceSpec>;

impl Service {
    /// Address clients should connect to, once the platform assigned one.
    pub fn address(&self) -> Option<&str> {
        match self.spec.service_type {
            ServiceType::ClusterIP => self.status.cluster_ip.as_deref(),
            ServiceType::LoadBalancer => self.status.load_balancer_address.as_deref(),
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// A volume mounted into a mover job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobVolume {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl JobVolume {
    pub fn claim(name: &str, claim: &str, mount_path: &str, read_only: bool) -> Self {
        Self {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            claim_name: Some(claim.to_string()),
            secret_name: None,
            read_only,
        }
    }

    pub fn secret(name: &str, secret: &str, mount_path: &str) -> Self {
        Self {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            claim_name: None,
            secret_name: Some(secret.to_string()),
            read_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<JobVolume>,
    #[serde(default)]
    pub service_account_name: String,
    #[serde(default)]
    pub backoff_limit: u32,
    /// `0` suspends the job without deleting it.
    #[serde(default)]
    pub parallelism: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl ResourceSpec for JobSpec {
    const KIND: &'static str = "Job";
    type Status = JobStatus;
}

pub type Job = Object<JobSpec>;

impl Job {
    pub fn is_succeeded(&self) -> bool {
        self.status.succeeded > 0
    }

    /// Failed once retries exceeded the backoff limit.
    pub fn is_failed(&self) -> bool {
        !self.is_succeeded() && self.status.failed > self.spec.backoff_limit
    }

    pub fn is_terminal(&self) -> bool {
        self.is_succeeded() || self.is_failed()
    }
}
