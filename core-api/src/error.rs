use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Failed to decode {kind} {name}: {source}")]
    Decode {
        kind: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {kind}: {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Expected object of kind {expected}, found {found}")]
    KindMismatch { expected: String, found: String },
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Bridge(e) if e.is_transient())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Bridge(e) if e.is_not_found())
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ApiError::Bridge(e) if e.is_already_exists())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
