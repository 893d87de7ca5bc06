use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("Conflict updating {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("Invalid object: {0}")]
    Invalid(String),

    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether retrying the same request later may succeed without any
    /// change to the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Conflict { .. } | BridgeError::NotAvailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BridgeError::AlreadyExists { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
