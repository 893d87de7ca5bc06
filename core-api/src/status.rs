//! # Replication Status
//!
//! Observed state written exclusively by the reconcilers. Sources and
//! destinations share one status shape, [`ReplicationStatus`], parameterised
//! by the phase enum of their state machine.
//!
//! Everything a reconcile pass needs to resume an interrupted cycle lives
//! here or in the existence of child objects: the in-flight [`CycleState`]
//! is persisted before any child of the cycle is created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::children::TypedLocalObjectReference;

/// Source state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourcePhase {
    #[default]
    Idle,
    Triggered,
    Snapshotting,
    Syncing,
    Completing,
    Error,
}

/// Destination state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DestinationPhase {
    #[default]
    Idle,
    Provisioning,
    Receiving,
    Snapshotting,
    Completing,
    Error,
}

impl fmt::Display for SourcePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for DestinationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// Conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Synchronizing,
    Reconciled,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Condition reasons shared by both reconcilers.
///
/// Error conditions use the failing error's own reason (for example
/// `UnknownMoverKind`) rather than one of these.
pub mod reasons {
    pub const SYNC_IN_PROGRESS: &str = "SyncInProgress";
    pub const WAITING_FOR_TRIGGER: &str = "WaitingForTrigger";
    pub const WAITING_FOR_SNAPSHOT: &str = "WaitingForSnapshot";
    pub const WAITING_FOR_VOLUME: &str = "WaitingForVolume";
    pub const PAUSED: &str = "Paused";
    pub const RECONCILED: &str = "Reconciled";
    pub const NO_ERROR: &str = "NoError";
    pub const RETRYING: &str = "Retrying";
}

// ============================================================================
// Cycle and mover bookkeeping
// ============================================================================

/// Durable progress marker of the cycle currently in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleState {
    /// Unique per cycle; child object names derive from it.
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// Manual token that started the cycle, consumed on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// Volume the mover reads from (source) or writes to (destination).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_volume: Option<String>,
    /// The mover reported the transfer as finished.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transferred: bool,
}

/// Connection details published by an rsync destination.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsyncStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResticStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pruned: Option<DateTime<Utc>>,
}

/// Mover-reported status fragment, merged into the parent's status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MoverStatus {
    pub rsync: Option<RsyncStatus>,
    pub restic: Option<ResticStatus>,
}

impl MoverStatus {
    pub fn is_empty(&self) -> bool {
        self.rsync.is_none() && self.restic.is_none()
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationStatus<P> {
    #[serde(default)]
    pub phase: P,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_start_time: Option<DateTime<Utc>>,
    /// Duration of the last completed cycle, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_sync_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<TypedLocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_manual_sync: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<CycleState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Generation that failed permanently; no work until it changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Consecutive transient failures, drives backoff.
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsync: Option<RsyncStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restic: Option<ResticStatus>,
}

impl<P> ReplicationStatus<P> {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type)
            .map_or(false, |c| c.status == ConditionStatus::True)
    }

    /// Insert or update a condition. The transition time only moves when the
    /// status value changes.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: impl Into<ConditionStatus>,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let status = status.into();
        let message = message.into();

        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                condition_type,
                status,
                reason: reason.to_string(),
                message,
                last_transition_time: now,
            }),
        }
    }

    /// Record a completed cycle. `last_sync_time` never moves backwards.
    pub fn record_sync(&mut self, completed_at: DateTime<Utc>) {
        self.last_sync_time = Some(match self.last_sync_time {
            Some(previous) if previous > completed_at => previous,
            _ => completed_at,
        });
        if let Some(started) = self.last_sync_start_time {
            self.last_sync_duration = Some((completed_at - started).num_seconds().max(0));
        }
    }

    /// Whether a permanent failure suspended this generation.
    pub fn is_suspended(&self, generation: i64) -> bool {
        self.suspended_generation == Some(generation)
    }

    pub fn apply_mover_status(&mut self, update: MoverStatus) {
        if let Some(rsync) = update.rsync {
            self.rsync = Some(rsync);
        }
        if let Some(restic) = update.restic {
            self.restic = Some(restic);
        }
    }
}
