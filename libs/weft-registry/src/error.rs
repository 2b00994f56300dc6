//! Registry Client Error Types

use thiserror::Error;
use weft_comlink::ComlinkError;

/// Result type for weft-registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry bootstrap errors
#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    /// Programming-contract violation (bootstrap order, missing communicator)
    #[error("Developer error: {0}")]
    Developer(String),

    /// Fatal setup failure
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Error escalated from the communication layer
    #[error(transparent)]
    Comlink(#[from] ComlinkError),
}

impl RegistryError {
    pub fn developer(msg: impl Into<String>) -> Self {
        RegistryError::Developer(msg.into())
    }

    pub fn initialization(msg: impl Into<String>) -> Self {
        RegistryError::Initialization(msg.into())
    }
}
