//! Error types for the notary context.

use shared_types::{MessageError, NotaryId, NymId, TransactionNumber};
use shared_crypto::CryptoError;
use thiserror::Error;

/// Errors raised by the notary context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The notary (or a stored object) broke the protocol.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A signature did not verify.
    #[error("Invalid signature on {0}")]
    InvalidSignature(String),

    /// Object belongs to a different notary.
    #[error("Wrong notary: expected {expected}, got {actual}")]
    WrongNotary {
        /// The context's notary.
        expected: NotaryId,
        /// The notary named by the object.
        actual: NotaryId,
    },

    /// Object belongs to a different nym.
    #[error("Wrong nym: expected {expected}, got {actual}")]
    WrongNym {
        /// The context's nym.
        expected: NymId,
        /// The nym named by the object.
        actual: NymId,
    },

    /// A transaction number at or below the high-water mark was offered as new.
    #[error("Stale transaction number {number} (highest {highest})")]
    StaleNumber {
        /// Offending number.
        number: TransactionNumber,
        /// Current high-water mark.
        highest: TransactionNumber,
    },

    /// Not enough available numbers for the requested purpose.
    #[error("No transaction number available ({available} held)")]
    NoAvailableNumber {
        /// Numbers currently available.
        available: usize,
    },

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A queued delivery is already running.
    #[error("Delivery already in progress")]
    DeliveryInProgress,

    /// Expected object is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persisted record version not understood.
    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u16),

    /// Crypto capability failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<MessageError> for ContextError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::UnsupportedVersion { received, .. } => Self::UnsupportedVersion(received),
            MessageError::InvalidSignature => Self::InvalidSignature("message".into()),
            MessageError::Serialization(msg) => Self::Serialization(msg),
            MessageError::MissingField(field) => {
                Self::ProtocolViolation(format!("missing field {field}"))
            }
        }
    }
}

impl From<bincode::Error> for ContextError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl ContextError {
    /// Label used for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol",
            Self::InvalidSignature(_) => "signature",
            Self::WrongNotary { .. } | Self::WrongNym { .. } => "identity",
            Self::StaleNumber { .. } => "stale_number",
            Self::NoAvailableNumber { .. } => "no_number",
            Self::Storage(_) | Self::NotFound(_) => "storage",
            Self::Serialization(_) | Self::UnsupportedVersion(_) => "serialization",
            Self::Transport(_) => "transport",
            Self::DeliveryInProgress => "busy",
            Self::Crypto(_) => "crypto",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_error_conversion() {
        let err: ContextError = MessageError::UnsupportedVersion {
            received: 4,
            supported: 1,
        }
        .into();
        assert_eq!(err, ContextError::UnsupportedVersion(4));
    }

    #[test]
    fn test_crypto_error_conversion() {
        let err: ContextError = CryptoError::SignatureVerificationFailed.into();
        assert_eq!(err.reason(), "crypto");
    }

    #[test]
    fn test_display_names_identities() {
        let err = ContextError::WrongNotary {
            expected: NotaryId::new("a"),
            actual: NotaryId::new("b"),
        };
        assert_eq!(err.to_string(), "Wrong notary: expected a, got b");
    }
}
