//! # Replication API Types
//!
//! Typed resources exchanged between the reconcilers and the platform.
//!
//! ## Overview
//!
//! - [`replication`] - the user-facing `ReplicationSource` and
//!   `ReplicationDestination` kinds and their mover sections
//! - [`status`] - shared status shape, phases and conditions
//! - [`children`] - volumes, snapshots, secrets, service accounts, services
//!   and jobs created per cycle
//! - [`client`] - typed access to a [`bridge_traits::ObjectStore`]
//!
//! All kinds are `Object<Spec>`; the spec type fixes the kind name and the
//! status type, see [`resource::ResourceSpec`].

pub mod children;
pub mod client;
pub mod error;
pub mod replication;
pub mod resource;
pub mod status;

pub use children::{
    AccessMode, Job, JobSpec, JobStatus, JobVolume, Secret, SecretSpec, Service, ServiceAccount,
    ServiceAccountSpec, ServiceSpec, ServiceStatus, ServiceType, TypedLocalObjectReference, Volume,
    VolumePhase, VolumeSnapshot, VolumeSnapshotSpec, VolumeSnapshotStatus, VolumeSpec,
    VolumeStatus,
};
pub use client::Client;
pub use error::{ApiError, Result};
pub use replication::{
    CopyMethod, DestinationVolumeOptions, RcloneSpec, ReplicationDestination,
    ReplicationDestinationSpec, ReplicationSource, ReplicationSourceSpec, ResticDestinationSpec,
    ResticRetainPolicy, ResticSourceSpec, RsyncDestinationSpec, RsyncSourceSpec,
    SourceVolumeOptions, TriggerSpec, DEFAULT_RETAIN,
};
pub use resource::{Object, ResourceSpec};
pub use status::{
    reasons, Condition, ConditionStatus, ConditionType, CycleState, DestinationPhase,
    MoverStatus, ReplicationStatus, ResticStatus, RsyncStatus, SourcePhase,
};
