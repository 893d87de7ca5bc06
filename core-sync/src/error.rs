use core_api::ApiError;
use core_mover::MoverError;
use core_provision::ProvisionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Invalid schedule '{schedule}': {message}")]
    InvalidSchedule { schedule: String, message: String },
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Mover(#[from] MoverError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid specification: {message}")]
    InvalidSpec { message: String },
}

/// How a reconciler reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Requeue with backoff; never surfaced as a terminal condition.
    Transient,
    /// Abandon the cycle, report it, retry at the next trigger.
    RetryableExternal,
    /// Suspend until the spec generation changes.
    Permanent,
    /// Suspend and leave the offending objects alone.
    InvariantViolation,
}

impl ErrorClass {
    /// Whether this class suspends the resource until its spec changes.
    pub fn suspends(&self) -> bool {
        matches!(self, ErrorClass::Permanent | ErrorClass::InvariantViolation)
    }
}

impl SyncError {
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        SyncError::InvalidSpec {
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Trigger(_) => ErrorClass::Permanent,
            SyncError::Mover(e) => mover_class(e),
            SyncError::Provision(e) => provision_class(e),
            SyncError::Api(e) => api_class(e),
            SyncError::InvalidSpec { .. } => ErrorClass::Permanent,
        }
    }

    /// Short machine-readable reason for status conditions and events.
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::Trigger(TriggerError::InvalidSchedule { .. }) => "InvalidSchedule",
            SyncError::Mover(e) => e.reason(),
            SyncError::Provision(e) => e.reason(),
            SyncError::Api(_) => "ObjectStoreError",
            SyncError::InvalidSpec { .. } => "InvalidSpec",
        }
    }
}

fn api_class(error: &ApiError) -> ErrorClass {
    match error {
        ApiError::Decode { .. } | ApiError::Encode { .. } | ApiError::KindMismatch { .. } => {
            ErrorClass::Permanent
        }
        _ => ErrorClass::Transient,
    }
}

fn provision_class(error: &ProvisionError) -> ErrorClass {
    if error.is_transient() {
        return ErrorClass::Transient;
    }
    if error.is_invariant_violation() {
        return ErrorClass::InvariantViolation;
    }
    match error {
        ProvisionError::Api(e) => api_class(e),
        ProvisionError::InvalidVolumeReference { .. } => ErrorClass::Permanent,
        _ => ErrorClass::RetryableExternal,
    }
}

fn mover_class(error: &MoverError) -> ErrorClass {
    match error {
        MoverError::Provision(e) => provision_class(e),
        MoverError::Api(e) => api_class(e),
        MoverError::JobFailed { .. } => ErrorClass::RetryableExternal,
        MoverError::UnknownMoverKind { .. }
        | MoverError::InvalidSpec { .. }
        | MoverError::DuplicateMover { .. }
        | MoverError::AlreadyInitialized
        | MoverError::NotInitialized => ErrorClass::Permanent,
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
