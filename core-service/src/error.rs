use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Mover error: {0}")]
    Mover(#[from] core_mover::MoverError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
