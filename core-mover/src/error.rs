use core_api::ApiError;
use core_provision::ProvisionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MoverError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("No mover named '{name}' is registered")]
    UnknownMoverKind { name: String },

    #[error("Mover '{name}' is already registered")]
    DuplicateMover { name: String },

    #[error("Invalid {mover} configuration: {message}")]
    InvalidSpec { mover: String, message: String },

    #[error("Mover job {job} failed: {message}")]
    JobFailed { job: String, message: String },

    #[error("Mover registry is already installed")]
    AlreadyInitialized,

    #[error("Mover registry has not been installed")]
    NotInitialized,
}

impl MoverError {
    pub fn invalid_spec(mover: &str, message: impl Into<String>) -> Self {
        MoverError::InvalidSpec {
            mover: mover.to_string(),
            message: message.into(),
        }
    }

    /// Short machine-readable reason for status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            MoverError::Provision(e) => e.reason(),
            MoverError::Api(_) => "ObjectStoreError",
            MoverError::UnknownMoverKind { .. } => "UnknownMoverKind",
            MoverError::DuplicateMover { .. } => "DuplicateMover",
            MoverError::InvalidSpec { .. } => "InvalidSpec",
            MoverError::JobFailed { .. } => "JobFailed",
            MoverError::AlreadyInitialized => "AlreadyInitialized",
            MoverError::NotInitialized => "NotInitialized",
        }
    }
}

pub type Result<T> = std::result::Result<T, MoverError>;
