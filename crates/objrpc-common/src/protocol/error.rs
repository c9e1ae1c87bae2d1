use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObjrpcError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Exists(String),

    #[error("Invalid access: {0}")]
    InvalidAccess(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not valid: {0}")]
    NotValid(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Response timeout {0}ms exceeded")]
    Timeout(u64),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Remote error ({kind}): {message}")]
    Remote { kind: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ObjrpcError>;

/// Error payload carried by an error-flagged response packet.
///
/// Protocol-level failures detected on the serving side travel back to the
/// caller as a `WireError` and are mapped onto the local taxonomy on arrival,
/// so a caller can match on typed variants regardless of which side of the
/// wire produced the failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    /// Stable error kind discriminator (e.g. "not_found")
    pub kind: String,
    /// Human-readable message from the producing side
    pub message: String,
}

impl WireError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Maps the wire kind back onto a typed error.
    ///
    /// Kinds that only make sense locally (timeout, connection state) are
    /// surfaced as [`ObjrpcError::Remote`] rather than being confused with a
    /// locally-raised condition.
    pub fn into_error(self) -> ObjrpcError {
        match self.kind.as_str() {
            "not_found" => ObjrpcError::NotFound(self.message),
            "exists" => ObjrpcError::Exists(self.message),
            "invalid_access" => ObjrpcError::InvalidAccess(self.message),
            "not_supported" => ObjrpcError::NotSupported(self.message),
            "not_valid" => ObjrpcError::NotValid(self.message),
            "illegal_state" => ObjrpcError::IllegalState(self.message),
            _ => ObjrpcError::Remote {
                kind: self.kind,
                message: self.message,
            },
        }
    }
}

impl From<&ObjrpcError> for WireError {
    fn from(err: &ObjrpcError) -> Self {
        let kind = match err {
            ObjrpcError::NotFound(_) => "not_found",
            ObjrpcError::Exists(_) => "exists",
            ObjrpcError::InvalidAccess(_) => "invalid_access",
            ObjrpcError::NotSupported(_) => "not_supported",
            ObjrpcError::NotValid(_) => "not_valid",
            ObjrpcError::IllegalState(_) => "illegal_state",
            ObjrpcError::Timeout(_) => "timeout",
            ObjrpcError::ConnectionClosed => "connection_closed",
            ObjrpcError::Remote { kind, message } => {
                return WireError::new(kind.clone(), message.clone())
            }
            ObjrpcError::Serialization(_) => "serialization",
            ObjrpcError::Io(_) => "io",
        };
        WireError::new(kind, err.to_string())
    }
}
