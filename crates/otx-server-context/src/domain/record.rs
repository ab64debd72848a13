//! # Persisted Context Record
//!
//! Format: \[MAGIC\]\[VERSION u16 LE\]\[bincode body\]
//!
//! | Version | Adds |
//! |---------|------|
//! | 1 | numbers, request counter, hashes, admin flags, revision |
//! | 2 | delivery state, last reply status |
//! | 3 | pending message, pending arguments, pending numbers |
//!
//! Older versions decode with the missing fields at `Idle` / `None` / empty.

use crate::domain::errors::ContextError;
use crate::domain::value_objects::{DeliveryState, LastReplyStatus, PendingArgs};
use serde::{Deserialize, Serialize};
use shared_types::{Hash, Message, NotaryId, NumberSet, NymId, RequestNumber, TransactionNumber};

/// Magic bytes for stored contexts.
const CONTEXT_MAGIC: &[u8; 6] = b"OTXCTX";

/// Everything needed to restore a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub nym_id: NymId,
    pub notary_id: NotaryId,
    pub highest: TransactionNumber,
    pub issued: NumberSet,
    pub available: NumberSet,
    pub tentative: NumberSet,
    pub request: RequestNumber,
    pub acknowledged: NumberSet,
    pub local_nymbox_hash: Option<Hash>,
    pub remote_nymbox_hash: Option<Hash>,
    pub admin_password: String,
    pub admin_attempted: bool,
    pub admin_success: bool,
    pub revision: u64,
    pub state: DeliveryState,
    pub last_status: LastReplyStatus,
    pub pending_message: Option<Message>,
    pub pending_args: PendingArgs,
    pub pending_numbers: NumberSet,
}

#[derive(Serialize, Deserialize)]
struct RecordV1 {
    nym_id: NymId,
    notary_id: NotaryId,
    highest: TransactionNumber,
    issued: NumberSet,
    available: NumberSet,
    tentative: NumberSet,
    request: RequestNumber,
    acknowledged: NumberSet,
    local_nymbox_hash: Option<Hash>,
    remote_nymbox_hash: Option<Hash>,
    admin_password: String,
    admin_attempted: bool,
    admin_success: bool,
    revision: u64,
}

#[derive(Serialize, Deserialize)]
struct RecordV2 {
    base: RecordV1,
    state: DeliveryState,
    last_status: LastReplyStatus,
}

impl From<RecordV1> for ContextRecord {
    fn from(v1: RecordV1) -> Self {
        Self {
            nym_id: v1.nym_id,
            notary_id: v1.notary_id,
            highest: v1.highest,
            issued: v1.issued,
            available: v1.available,
            tentative: v1.tentative,
            request: v1.request,
            acknowledged: v1.acknowledged,
            local_nymbox_hash: v1.local_nymbox_hash,
            remote_nymbox_hash: v1.remote_nymbox_hash,
            admin_password: v1.admin_password,
            admin_attempted: v1.admin_attempted,
            admin_success: v1.admin_success,
            revision: v1.revision,
            state: DeliveryState::Idle,
            last_status: LastReplyStatus::None,
            pending_message: None,
            pending_args: PendingArgs::default(),
            pending_numbers: NumberSet::new(),
        }
    }
}

impl From<RecordV2> for ContextRecord {
    fn from(v2: RecordV2) -> Self {
        let mut record = ContextRecord::from(v2.base);
        // Without a pending message snapshot there is nothing to resume.
        record.state = if v2.state == DeliveryState::PendingSend {
            DeliveryState::Idle
        } else {
            v2.state
        };
        record.last_status = v2.last_status;
        record
    }
}

impl ContextRecord {
    /// Version written by `to_bytes`.
    pub const VERSION: u16 = 3;

    /// Encode at the current version.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContextError> {
        let body = bincode::serialize(self)?;
        let mut buf = Vec::with_capacity(CONTEXT_MAGIC.len() + 2 + body.len());
        buf.extend_from_slice(CONTEXT_MAGIC);
        buf.extend_from_slice(&Self::VERSION.to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode any known version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContextError> {
        let header_len = CONTEXT_MAGIC.len() + 2;
        if bytes.len() < header_len || &bytes[..CONTEXT_MAGIC.len()] != CONTEXT_MAGIC {
            return Err(ContextError::Serialization("invalid context magic".into()));
        }
        let version = u16::from_le_bytes([bytes[CONTEXT_MAGIC.len()], bytes[CONTEXT_MAGIC.len() + 1]]);
        let body = &bytes[header_len..];

        match version {
            1 => Ok(bincode::deserialize::<RecordV1>(body)?.into()),
            2 => Ok(bincode::deserialize::<RecordV2>(body)?.into()),
            3 => Ok(bincode::deserialize::<ContextRecord>(body)?),
            other => Err(ContextError::UnsupportedVersion(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::MessageType;

    fn v1() -> RecordV1 {
        RecordV1 {
            nym_id: NymId::new("nym"),
            notary_id: NotaryId::new("notary"),
            highest: 12,
            issued: [10, 11, 12].into_iter().collect(),
            available: [11, 12].into_iter().collect(),
            tentative: NumberSet::new(),
            request: 9,
            acknowledged: [7, 8].into_iter().collect(),
            local_nymbox_hash: Some([1; 32]),
            remote_nymbox_hash: Some([2; 32]),
            admin_password: String::new(),
            admin_attempted: false,
            admin_success: false,
            revision: 4,
        }
    }

    fn encode_raw<T: Serialize>(version: u16, body: &T) -> Vec<u8> {
        let mut buf = CONTEXT_MAGIC.to_vec();
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&bincode::serialize(body).unwrap());
        buf
    }

    #[test]
    fn test_v1_collapses_to_idle() {
        let record = ContextRecord::from_bytes(&encode_raw(1, &v1())).unwrap();
        assert_eq!(record.state, DeliveryState::Idle);
        assert_eq!(record.last_status, LastReplyStatus::None);
        assert!(record.pending_message.is_none());
        assert_eq!(record.request, 9);
        assert_eq!(record.revision, 4);
    }

    #[test]
    fn test_v2_keeps_nymbox_state() {
        let v2 = RecordV2 {
            base: v1(),
            state: DeliveryState::NeedBoxItems,
            last_status: LastReplyStatus::Unknown,
        };
        let record = ContextRecord::from_bytes(&encode_raw(2, &v2)).unwrap();
        assert_eq!(record.state, DeliveryState::NeedBoxItems);
        assert_eq!(record.last_status, LastReplyStatus::Unknown);
    }

    #[test]
    fn test_v2_pending_send_without_message_is_idle() {
        let v2 = RecordV2 {
            base: v1(),
            state: DeliveryState::PendingSend,
            last_status: LastReplyStatus::None,
        };
        let record = ContextRecord::from_bytes(&encode_raw(2, &v2)).unwrap();
        assert_eq!(record.state, DeliveryState::Idle);
    }

    #[test]
    fn test_current_version_keeps_pending_message() {
        let mut record: ContextRecord = v1().into();
        record.state = DeliveryState::PendingSend;
        record.pending_message = Some(Message::request(
            MessageType::SendNymMessage,
            NymId::new("nym"),
            NotaryId::new("notary"),
            9,
        ));
        record.pending_numbers = [11].into_iter().collect();

        let decoded = ContextRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_unknown_version() {
        assert_eq!(
            ContextRecord::from_bytes(&encode_raw(9, &v1())),
            Err(ContextError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(
            ContextRecord::from_bytes(b"nope"),
            Err(ContextError::Serialization(_))
        ));
    }
}
