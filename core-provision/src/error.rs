use core_api::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{kind} {name} exists but is not controlled by {owner}")]
    NotOwned {
        kind: String,
        name: String,
        owner: String,
    },

    #[error("Job {running} is still running for {owner}")]
    JobInFlight { owner: String, running: String },

    #[error("Multiple mover jobs in flight for {owner}: {}", jobs.join(", "))]
    MultipleJobsInFlight { owner: String, jobs: Vec<String> },

    #[error("Volume {name} does not exist")]
    InvalidVolumeReference { name: String },

    #[error("Snapshot {name} not found")]
    SnapshotNotFound { name: String },

    #[error("Snapshot {name} failed: {message}")]
    SnapshotFailed { name: String, message: String },

    #[error("Snapshot {name} not ready after {waited_secs}s")]
    SnapshotTimeout { name: String, waited_secs: i64 },
}

impl ProvisionError {
    /// Conditions expected to clear up on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            ProvisionError::Api(e) => e.is_transient(),
            ProvisionError::JobInFlight { .. } => true,
            _ => false,
        }
    }

    /// Inconsistencies the core refuses to repair on its own.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            ProvisionError::NotOwned { .. } | ProvisionError::MultipleJobsInFlight { .. }
        )
    }

    /// Short machine-readable reason for status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            ProvisionError::Api(_) => "ObjectStoreError",
            ProvisionError::NotOwned { .. } => "NotOwned",
            ProvisionError::JobInFlight { .. } => "JobInFlight",
            ProvisionError::MultipleJobsInFlight { .. } => "MultipleJobsInFlight",
            ProvisionError::InvalidVolumeReference { .. } => "InvalidVolumeReference",
            ProvisionError::SnapshotNotFound { .. } => "SnapshotNotFound",
            ProvisionError::SnapshotFailed { .. } => "SnapshotFailed",
            ProvisionError::SnapshotTimeout { .. } => "SnapshotTimeout",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
