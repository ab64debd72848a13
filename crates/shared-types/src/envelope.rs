//! # Signed Protocol Message
//!
//! The envelope for every client/notary exchange.
//!
//! ## Properties
//!
//! - **Sequencing**: requests carry the nym's `request_number`; replies echo it.
//! - **Acknowledgement**: requests list the reply numbers the client has
//!   already processed; replies list which of those the notary has seen.
//! - **Authenticity**: `signature` covers every other field. Signing and
//!   verification are performed by the caller's crypto capability over
//!   `signing_bytes()`.

use crate::entities::{
    AccountId, BoxType, Hash, MessageType, NotaryId, NumberSet, NymId, RequestNumber,
    TransactionNumber,
};
use crate::errors::MessageError;
use serde::{Deserialize, Serialize};

/// A signed command or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Envelope version.
    pub version: u16,

    /// The command this message carries (or answers).
    pub command: MessageType,

    /// True for notary replies.
    pub is_reply: bool,

    /// The nym the exchange belongs to.
    pub nym_id: NymId,

    /// The notary the exchange is with.
    pub notary_id: NotaryId,

    /// Request number of the request (echoed by the reply).
    pub request_number: RequestNumber,

    /// Reply outcome. Meaningless on requests.
    pub success: bool,

    /// On requests: reply numbers the client has processed.
    /// On replies: the subset of those the notary has seen.
    pub acknowledged_replies: NumberSet,

    /// On requests: the client's local nymbox hash.
    /// On replies: the notary's current nymbox hash.
    pub nymbox_hash: Option<Hash>,

    /// Account the command refers to, if any.
    pub account_id: Option<AccountId>,

    /// Box the command refers to (`getBoxReceipt`).
    pub box_type: Option<BoxType>,

    /// Transaction number the command refers to (`getBoxReceipt`).
    pub transaction_number: TransactionNumber,

    /// Reply to `getRequestNumber`: the number the notary expects next.
    pub new_request_number: RequestNumber,

    /// Armored command- or reply-specific content.
    pub payload: Vec<u8>,

    /// On replies: the armored request being answered.
    pub in_reference_to: Vec<u8>,

    /// Signature over `signing_bytes()`.
    pub signature: Vec<u8>,
}

impl Message {
    /// Current envelope version.
    pub const CURRENT_VERSION: u16 = 1;

    /// Create an unsigned request.
    pub fn request(
        command: MessageType,
        nym_id: NymId,
        notary_id: NotaryId,
        request_number: RequestNumber,
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            command,
            is_reply: false,
            nym_id,
            notary_id,
            request_number,
            success: false,
            acknowledged_replies: NumberSet::new(),
            nymbox_hash: None,
            account_id: None,
            box_type: None,
            transaction_number: 0,
            new_request_number: 0,
            payload: Vec::new(),
            in_reference_to: Vec::new(),
            signature: Vec::new(),
        }
    }

    /// Create an unsigned reply to `request`.
    pub fn reply_to(request: &Message, success: bool) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            command: request.command,
            is_reply: true,
            nym_id: request.nym_id.clone(),
            notary_id: request.notary_id.clone(),
            request_number: request.request_number,
            success,
            acknowledged_replies: NumberSet::new(),
            nymbox_hash: None,
            account_id: request.account_id.clone(),
            box_type: request.box_type,
            transaction_number: request.transaction_number,
            new_request_number: 0,
            payload: Vec::new(),
            in_reference_to: request.to_bytes().unwrap_or_default(),
            signature: Vec::new(),
        }
    }

    /// Bytes covered by the signature (the message with `signature` blank).
    pub fn signing_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let mut unsigned = self.clone();
        unsigned.signature.clear();
        unsigned.to_bytes()
    }

    /// Attach a signature produced over `signing_bytes()`.
    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }

    /// True once a signature has been attached.
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Armor the whole message.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        bincode::serialize(self).map_err(|e| MessageError::Serialization(e.to_string()))
    }

    /// De-armor a message, rejecting unknown envelope versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let message: Message =
            bincode::deserialize(bytes).map_err(|e| MessageError::Serialization(e.to_string()))?;
        if message.version != Self::CURRENT_VERSION {
            return Err(MessageError::UnsupportedVersion {
                received: message.version,
                supported: Self::CURRENT_VERSION,
            });
        }
        Ok(message)
    }

    /// Decode the request this reply answers.
    pub fn original_request(&self) -> Result<Option<Message>, MessageError> {
        if self.in_reference_to.is_empty() {
            return Ok(None);
        }
        Self::from_bytes(&self.in_reference_to).map(Some)
    }
}
