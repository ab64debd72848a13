//! # Error Types
//!
//! Errors raised while building, armoring or checking protocol messages.

use thiserror::Error;

/// Errors related to message encoding and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Envelope version not supported.
    #[error("Unsupported version: received {received}, supported {supported}")]
    UnsupportedVersion { received: u16, supported: u16 },

    /// Armoring or de-armoring failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Invalid signature.
    #[error("Invalid signature")]
    InvalidSignature,

    /// A required field is blank.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}
