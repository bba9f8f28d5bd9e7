use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for file-storage-provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing required attribute {attribute} on {address}")]
    MissingAttribute { address: String, attribute: String },

    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("Resource {id} entered unexpected lifecycle state {state}")]
    UnexpectedState { id: String, state: String },

    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("State error: {0}")]
    State(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ProviderError {
    /// HTTP status the control plane would answer with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ProviderError::NotFound(_) | ProviderError::UnknownReference(_) => 404,
            ProviderError::Conflict(_) => 409,
            ProviderError::InvalidArgument(_)
            | ProviderError::MissingAttribute { .. }
            | ProviderError::UnsupportedType(_)
            | ProviderError::Config(_) => 400,
            ProviderError::Timeout { .. } => 504,
            ProviderError::UnexpectedState { .. }
            | ProviderError::Io(_)
            | ProviderError::State(_)
            | ProviderError::Backend(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Result type alias for file-storage-provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;
