//! Communication Link Error Types
//!
//! Core error taxonomy for the communication layer. Developer and
//! initialization errors always escalate unchanged; transport and codec
//! failures are wrapped into `Communication`/`Decode` carrying the original
//! cause message.

use thiserror::Error;

/// Result type for weft-comlink operations
pub type Result<T> = std::result::Result<T, ComlinkError>;

/// Classified outcome attached to communication errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommStatus {
    /// Wrong trust relationship: certificate chain or hostname mismatch
    Unauthorized,
    /// Endpoint unreachable or not responding
    ServiceUnavailable,
    /// Receive deadline elapsed
    Timeout,
    /// Call sequencing violation (unread response, post-handshake params)
    ProtocolViolation,
    /// Unclassified transport failure
    Other,
}

impl std::fmt::Display for CommStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommStatus::Unauthorized => write!(f, "UNAUTHORIZED"),
            CommStatus::ServiceUnavailable => write!(f, "SERVICE_UNAVAILABLE"),
            CommStatus::Timeout => write!(f, "TIMEOUT"),
            CommStatus::ProtocolViolation => write!(f, "PROTOCOL_VIOLATION"),
            CommStatus::Other => write!(f, "OTHER"),
        }
    }
}

/// Communication link errors
#[derive(Debug, Error, Clone)]
pub enum ComlinkError {
    /// Programming-contract violation, never retried
    #[error("Developer error: {0}")]
    Developer(String),

    /// Fatal setup failure, communicator stays uninitialized
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Runtime transport failure, caller decides whether to retry
    #[error("Communication error ({status}): {message}")]
    Communication { status: CommStatus, message: String },

    /// Payload decoding failure
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ComlinkError {
    fn from(err: serde_json::Error) -> Self {
        ComlinkError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ComlinkError {
    fn from(err: std::io::Error) -> Self {
        ComlinkError::Communication {
            status: CommStatus::Other,
            message: err.to_string(),
        }
    }
}

impl From<rumqttc::ClientError> for ComlinkError {
    fn from(err: rumqttc::ClientError) -> Self {
        ComlinkError::Communication {
            status: CommStatus::Other,
            message: err.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ComlinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ComlinkError::Communication {
            status: CommStatus::Other,
            message: err.to_string(),
        }
    }
}

// Helper methods for creating errors
impl ComlinkError {
    pub fn developer(msg: impl Into<String>) -> Self {
        ComlinkError::Developer(msg.into())
    }

    pub fn initialization(msg: impl Into<String>) -> Self {
        ComlinkError::Initialization(msg.into())
    }

    pub fn communication(status: CommStatus, msg: impl Into<String>) -> Self {
        ComlinkError::Communication {
            status,
            message: msg.into(),
        }
    }

    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        ComlinkError::Communication {
            status: CommStatus::ProtocolViolation,
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ComlinkError::Communication {
            status: CommStatus::Timeout,
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        ComlinkError::Decode(msg.into())
    }

    /// Status carried by a communication error, if any
    pub fn status(&self) -> Option<CommStatus> {
        match self {
            ComlinkError::Communication { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Developer and initialization errors escalate unchanged; everything
    /// else is already a communication-layer error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ComlinkError::Developer(_) | ComlinkError::Initialization(_)
        )
    }
}
