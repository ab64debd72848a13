//! Command- and reply-specific content carried in `Message::payload`.

use crate::domain::errors::ContextError;
use crate::domain::ledger::{Item, Ledger, Transaction};
use crate::domain::statement::TransactionStatement;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_types::{NumberSet, TransactionNumber};

/// Encode a payload.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, ContextError> {
    Ok(bincode::serialize(payload)?)
}

/// Decode a payload.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ContextError> {
    if bytes.is_empty() {
        return Err(ContextError::ProtocolViolation("empty payload".into()));
    }
    Ok(bincode::deserialize(bytes)?)
}

/// `registerNym` reply: the notary's record of the nym.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NymRegistration {
    /// Numbers the notary considers issued to the nym.
    pub issued: NumberSet,
}

/// `processNymbox` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessNymboxReply {
    /// The request's items, each acknowledged or rejected.
    pub items: Vec<Item>,
    /// The notary's statement of the nym's numbers after processing.
    pub statement: Option<TransactionStatement>,
}

/// How the notary disposed of one notarized transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Complete; the number is closed.
    Final,
    /// Refused; the number is burned.
    Rejected,
    /// Waiting on a counterparty; the number stays issued.
    Pending { receipt: Option<Transaction> },
    /// A cron activation was refused; its closing numbers are unused.
    CronRejected { closing_numbers: NumberSet },
}

/// Result for one transaction number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub number: TransactionNumber,
    pub disposition: Disposition,
}

/// `notarizeTransaction` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarizeReply {
    pub outcomes: Vec<TransactionOutcome>,
}

/// `getAccountData` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    /// Encoded account contract.
    pub account: Vec<u8>,
    pub inbox: Ledger,
    pub outbox: Ledger,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_empty() {
        let result: Result<NymRegistration, _> = decode_payload(&[]);
        assert!(matches!(result, Err(ContextError::ProtocolViolation(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result: Result<NotarizeReply, _> = decode_payload(&[0xff; 3]);
        assert!(matches!(result, Err(ContextError::Serialization(_))));
    }
}
