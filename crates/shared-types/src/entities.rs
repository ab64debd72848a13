//! # Core Protocol Entities
//!
//! Identifiers and scalar types shared by every Open-Transactions client crate.
//!
//! ## Clusters
//!
//! - **Identity**: `NymId`, `NotaryId`, `AccountId`
//! - **Numbering**: `TransactionNumber`, `RequestNumber`, `NumberSet`
//! - **Boxes**: `BoxType`
//! - **Commands**: `MessageType`

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A 32-byte content hash (BLAKE3).
pub type Hash = [u8; 32];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// Server-issued single-use token authorizing one stateful operation.
///
/// Signed to match the wire protocol, where `0` and negative values mean
/// "no number".
pub type TransactionNumber = i64;

/// Per-nym message sequence number assigned by the notary.
pub type RequestNumber = i64;

/// Ordered set of transaction or request numbers.
pub type NumberSet = BTreeSet<i64>;

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        pub struct $name(pub String);

        impl $name {
            /// Create from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier text.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if the identifier is blank.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_identifier!(
    /// Identifier of a nym (a cryptographic identity).
    NymId
);

string_identifier!(
    /// Identifier of a notary server.
    NotaryId
);

string_identifier!(
    /// Identifier of an asset account held at a notary.
    AccountId
);

/// The kinds of ledger ("box") a notary keeps for a nym or account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BoxType {
    /// Per-nym box of server notices.
    Nymbox,
    /// Per-account incoming receipts.
    Inbox,
    /// Per-account outgoing pending transfers.
    Outbox,
    /// Per-nym incoming payment instruments.
    PaymentInbox,
    /// Per-nym or per-account archive of closed receipts.
    RecordBox,
    /// Per-nym archive of expired instruments.
    ExpiredBox,
}

impl BoxType {
    /// Storage tag for keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nymbox => "nymbox",
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
            Self::PaymentInbox => "paymentInbox",
            Self::RecordBox => "recordBox",
            Self::ExpiredBox => "expiredBox",
        }
    }

    /// True for boxes that belong to an account rather than a nym.
    pub fn is_account_box(&self) -> bool {
        matches!(self, Self::Inbox | Self::Outbox)
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands a client sends to a notary. Replies carry the same type with
/// `Message::is_reply` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Liveness probe.
    PingNotary,
    /// Register the nym with the notary.
    RegisterNym,
    /// Remove the nym's registration.
    UnregisterNym,
    /// Fetch the current request number.
    GetRequestNumber,
    /// Ask for a fresh batch of transaction numbers (delivered as a blank).
    GetTransactionNumbers,
    /// Download the abbreviated nymbox.
    GetNymbox,
    /// Download one full box receipt.
    GetBoxReceipt,
    /// Accept nymbox items.
    ProcessNymbox,
    /// Accept or reject inbox receipts.
    ProcessInbox,
    /// Submit an account transaction.
    NotarizeTransaction,
    /// Download account, inbox and outbox.
    GetAccountData,
    /// Download another nym's public credentials.
    CheckNym,
    /// Send a message to another nym.
    SendNymMessage,
    /// Open an asset account.
    RegisterAccount,
    /// Close an asset account.
    UnregisterAccount,
    /// Publish a unit definition.
    RegisterInstrumentDefinition,
    /// Download a unit definition.
    GetInstrumentDefinition,
    /// Download a mint.
    GetMint,
    /// List markets.
    GetMarketList,
    /// List offers on a market.
    GetMarketOffers,
    /// Recent trades on a market.
    GetMarketRecentTrades,
    /// Offers belonging to this nym.
    GetNymMarketOffers,
    /// Trigger a smart contract clause.
    TriggerClause,
    /// Query or adjust usage credits.
    UsageCredits,
    /// Publish a server contract.
    RegisterContract,
    /// Query which unit definitions the notary supports.
    QueryInstrumentDefinitions,
}

impl MessageType {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PingNotary => "pingNotary",
            Self::RegisterNym => "registerNym",
            Self::UnregisterNym => "unregisterNym",
            Self::GetRequestNumber => "getRequestNumber",
            Self::GetTransactionNumbers => "getTransactionNumbers",
            Self::GetNymbox => "getNymbox",
            Self::GetBoxReceipt => "getBoxReceipt",
            Self::ProcessNymbox => "processNymbox",
            Self::ProcessInbox => "processInbox",
            Self::NotarizeTransaction => "notarizeTransaction",
            Self::GetAccountData => "getAccountData",
            Self::CheckNym => "checkNym",
            Self::SendNymMessage => "sendNymMessage",
            Self::RegisterAccount => "registerAccount",
            Self::UnregisterAccount => "unregisterAccount",
            Self::RegisterInstrumentDefinition => "registerInstrumentDefinition",
            Self::GetInstrumentDefinition => "getInstrumentDefinition",
            Self::GetMint => "getMint",
            Self::GetMarketList => "getMarketList",
            Self::GetMarketOffers => "getMarketOffers",
            Self::GetMarketRecentTrades => "getMarketRecentTrades",
            Self::GetNymMarketOffers => "getNymMarketOffers",
            Self::TriggerClause => "triggerClause",
            Self::UsageCredits => "usageCredits",
            Self::RegisterContract => "registerContract",
            Self::QueryInstrumentDefinitions => "queryInstrumentDefinitions",
        }
    }

    /// Wire name of the matching reply.
    pub fn reply_name(&self) -> String {
        format!("{}Response", self.as_str())
    }

    /// Commands that consume a request number from the nym's sequence.
    ///
    /// The three exceptions are the ones a client must be able to send
    /// before it knows its request number.
    pub fn requires_request_number(&self) -> bool {
        !matches!(
            self,
            Self::PingNotary | Self::RegisterNym | Self::GetRequestNumber
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_display() {
        let nym = NymId::new("ot2nym");
        assert_eq!(nym.to_string(), "ot2nym");
        assert!(!nym.is_empty());
        assert!(NotaryId::default().is_empty());
    }

    #[test]
    fn test_request_number_exemptions() {
        assert!(!MessageType::PingNotary.requires_request_number());
        assert!(!MessageType::RegisterNym.requires_request_number());
        assert!(!MessageType::GetRequestNumber.requires_request_number());
        assert!(MessageType::ProcessNymbox.requires_request_number());
        assert!(MessageType::NotarizeTransaction.requires_request_number());
    }

    #[test]
    fn test_reply_name() {
        assert_eq!(MessageType::GetNymbox.reply_name(), "getNymboxResponse");
    }

    #[test]
    fn test_account_boxes() {
        assert!(BoxType::Inbox.is_account_box());
        assert!(BoxType::Outbox.is_account_box());
        assert!(!BoxType::Nymbox.is_account_box());
    }
}
