//! # Ledgers, Transactions and Items
//!
//! Boxes (nymbox, inbox, outbox...) are ledgers: ordered collections of
//! transactions keyed by transaction number. A box downloaded from the notary
//! holds abbreviated entries until the full receipt is fetched.
//!
//! Every signed object embeds a [`ContractHeader`] and implements
//! [`Signable`]; the kinds are closed enums matched exhaustively.

use crate::domain::errors::ContextError;
use serde::{Deserialize, Serialize};
use shared_crypto::{ledger_hash, receipt_hash, ContentHasher, LEDGER_DOMAIN};
use shared_types::{
    AccountId, BoxType, Hash, Message, NotaryId, NumberSet, NymId, RequestNumber,
    TransactionNumber,
};
use std::collections::BTreeMap;

/// Who signs a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerRole {
    /// The local nym.
    Nym,
    /// The notary.
    Notary,
}

/// Signed-contract metadata shared by ledgers and transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractHeader {
    /// Owning nym.
    pub nym_id: NymId,
    /// Notary the contract lives on.
    pub notary_id: NotaryId,
    /// Account, for account boxes and account transactions.
    pub account_id: Option<AccountId>,
    /// Signing party.
    pub signer: SignerRole,
    /// Signature over the contract with this field blank.
    pub signature: Vec<u8>,
}

impl ContractHeader {
    /// Unsigned header.
    pub fn new(nym_id: NymId, notary_id: NotaryId, signer: SignerRole) -> Self {
        Self {
            nym_id,
            notary_id,
            account_id: None,
            signer,
            signature: Vec::new(),
        }
    }

    /// Attach an account.
    pub fn with_account(mut self, account: AccountId) -> Self {
        self.account_id = Some(account);
        self
    }

    /// Check the header names the expected nym and notary.
    pub fn verify_owner(&self, nym: &NymId, notary: &NotaryId) -> Result<(), ContextError> {
        if &self.notary_id != notary {
            return Err(ContextError::WrongNotary {
                expected: notary.clone(),
                actual: self.notary_id.clone(),
            });
        }
        if &self.nym_id != nym {
            return Err(ContextError::WrongNym {
                expected: nym.clone(),
                actual: self.nym_id.clone(),
            });
        }
        Ok(())
    }
}

/// Capability of objects carrying a signature.
pub trait Signable {
    /// Short name used in logs and errors.
    fn contract_name(&self) -> &'static str;

    /// Party expected to have signed.
    fn signer_role(&self) -> SignerRole;

    /// Bytes covered by the signature.
    fn signing_bytes(&self) -> Result<Vec<u8>, ContextError>;

    /// Current signature.
    fn signature(&self) -> &[u8];

    /// Replace the signature.
    fn set_signature(&mut self, signature: Vec<u8>);
}

impl Signable for Message {
    fn contract_name(&self) -> &'static str {
        self.command.as_str()
    }

    fn signer_role(&self) -> SignerRole {
        if self.is_reply {
            SignerRole::Notary
        } else {
            SignerRole::Nym
        }
    }

    fn signing_bytes(&self) -> Result<Vec<u8>, ContextError> {
        Ok(Message::signing_bytes(self)?)
    }

    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        Message::set_signature(self, signature)
    }
}

/// Transaction kinds with their kind-specific content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Nym-to-nym message.
    Message { payload: Vec<u8> },
    /// Incoming instrument notice.
    InstrumentNotice { payload: Vec<u8> },
    /// Generic notary notice.
    Notice { payload: Vec<u8> },
    /// The notary confirms numbers the nym accepted from a blank.
    SuccessNotice { numbers: NumberSet },
    /// Copy of a reply, dropped in case the original was lost.
    ReplyNotice {
        request_number: RequestNumber,
        reply: Vec<u8>,
    },
    /// Fresh numbers on offer.
    Blank { numbers: NumberSet },
    /// A cron item finished; its opening number is closed.
    FinalReceipt {
        opening_number: TransactionNumber,
        closing_numbers: NumberSet,
    },
    /// Client request accepting nymbox entries.
    ProcessNymbox,
    /// Client request accepting or rejecting inbox receipts.
    ProcessInbox {
        accepted: NumberSet,
        rejected: NumberSet,
    },
    /// Account-to-account transfer.
    Transfer { recipient: AccountId, amount: i64 },
    /// Outbox record of a transfer awaiting the recipient.
    PendingTransfer { amount: i64 },
    /// Inbox receipt for a completed transfer.
    TransferReceipt { amount: i64 },
    /// Activation of a recurring (cron) agreement.
    CronActivation { closing_numbers: NumberSet },
}

/// Tag of a [`TransactionKind`], kept by abbreviated entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Message,
    InstrumentNotice,
    Notice,
    SuccessNotice,
    ReplyNotice,
    Blank,
    FinalReceipt,
    ProcessNymbox,
    ProcessInbox,
    Transfer,
    PendingTransfer,
    TransferReceipt,
    CronActivation,
}

impl TransactionKind {
    /// The fieldless tag.
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Message { .. } => TransactionType::Message,
            Self::InstrumentNotice { .. } => TransactionType::InstrumentNotice,
            Self::Notice { .. } => TransactionType::Notice,
            Self::SuccessNotice { .. } => TransactionType::SuccessNotice,
            Self::ReplyNotice { .. } => TransactionType::ReplyNotice,
            Self::Blank { .. } => TransactionType::Blank,
            Self::FinalReceipt { .. } => TransactionType::FinalReceipt,
            Self::ProcessNymbox => TransactionType::ProcessNymbox,
            Self::ProcessInbox { .. } => TransactionType::ProcessInbox,
            Self::Transfer { .. } => TransactionType::Transfer,
            Self::PendingTransfer { .. } => TransactionType::PendingTransfer,
            Self::TransferReceipt { .. } => TransactionType::TransferReceipt,
            Self::CronActivation { .. } => TransactionType::CronActivation,
        }
    }
}

/// Item kinds inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    AcceptMessage,
    AcceptNotice,
    AcceptTransaction,
    AcceptFinalReceipt,
    AcceptPending,
    RejectPending,
    TransactionStatement,
}

/// Request items are answered with an acknowledgement or rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Request,
    Acknowledgement,
    Rejection,
}

/// One line of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub kind: ItemKind,
    pub status: ItemStatus,
    /// The box entry this item answers.
    pub in_reference_to: TransactionNumber,
    /// Numbers the item carries (accepted blanks, confirmed notices).
    pub numbers: NumberSet,
    /// Encoded attachment (a statement, for statement items).
    pub attachment: Vec<u8>,
}

impl Item {
    /// New request item.
    pub fn request(kind: ItemKind, in_reference_to: TransactionNumber) -> Self {
        Self {
            kind,
            status: ItemStatus::Request,
            in_reference_to,
            numbers: NumberSet::new(),
            attachment: Vec::new(),
        }
    }

    /// Attach numbers.
    pub fn with_numbers(mut self, numbers: NumberSet) -> Self {
        self.numbers = numbers;
        self
    }

    /// Attach encoded content.
    pub fn with_attachment(mut self, attachment: Vec<u8>) -> Self {
        self.attachment = attachment;
        self
    }

    /// The notary's answer to this item.
    pub fn answered(&self, accepted: bool) -> Self {
        let mut answer = self.clone();
        answer.status = if accepted {
            ItemStatus::Acknowledgement
        } else {
            ItemStatus::Rejection
        };
        answer
    }
}

/// A signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub header: ContractHeader,
    pub number: TransactionNumber,
    pub in_reference_to: TransactionNumber,
    pub kind: TransactionKind,
    pub items: Vec<Item>,
}

impl Transaction {
    /// Unsigned transaction.
    pub fn new(header: ContractHeader, number: TransactionNumber, kind: TransactionKind) -> Self {
        Self {
            header,
            number,
            in_reference_to: 0,
            kind,
            items: Vec::new(),
        }
    }

    /// Set the referenced number.
    pub fn with_reference(mut self, in_reference_to: TransactionNumber) -> Self {
        self.in_reference_to = in_reference_to;
        self
    }

    /// Tag of the kind.
    pub fn transaction_type(&self) -> TransactionType {
        self.kind.transaction_type()
    }

    /// Encode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContextError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContextError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Hash recorded by the abbreviated form.
    pub fn receipt_hash(&self) -> Result<Hash, ContextError> {
        Ok(receipt_hash(&self.to_bytes()?))
    }

    /// Abbreviated form for a box listing.
    pub fn abbreviate(&self) -> Result<AbbreviatedReceipt, ContextError> {
        Ok(AbbreviatedReceipt {
            number: self.number,
            transaction_type: self.transaction_type(),
            in_reference_to: self.in_reference_to,
            receipt_hash: self.receipt_hash()?,
        })
    }
}

impl Signable for Transaction {
    fn contract_name(&self) -> &'static str {
        "transaction"
    }

    fn signer_role(&self) -> SignerRole {
        self.header.signer
    }

    fn signing_bytes(&self) -> Result<Vec<u8>, ContextError> {
        let mut unsigned = self.clone();
        unsigned.header.signature.clear();
        unsigned.to_bytes()
    }

    fn signature(&self) -> &[u8] {
        &self.header.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.header.signature = signature;
    }
}

/// Box entry whose full receipt has not been downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbbreviatedReceipt {
    pub number: TransactionNumber,
    pub transaction_type: TransactionType,
    pub in_reference_to: TransactionNumber,
    pub receipt_hash: Hash,
}

/// One box entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntry {
    Abbreviated(AbbreviatedReceipt),
    Full(Transaction),
}

impl LedgerEntry {
    /// Transaction number of the entry.
    pub fn number(&self) -> TransactionNumber {
        match self {
            Self::Abbreviated(receipt) => receipt.number,
            Self::Full(transaction) => transaction.number,
        }
    }

    /// Tag of the entry.
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Abbreviated(receipt) => receipt.transaction_type,
            Self::Full(transaction) => transaction.transaction_type(),
        }
    }

    /// True until the receipt is downloaded.
    pub fn is_abbreviated(&self) -> bool {
        matches!(self, Self::Abbreviated(_))
    }

    /// Full transaction, if downloaded.
    pub fn as_full(&self) -> Option<&Transaction> {
        match self {
            Self::Full(transaction) => Some(transaction),
            Self::Abbreviated(_) => None,
        }
    }

    fn abbreviated(&self) -> Result<AbbreviatedReceipt, ContextError> {
        match self {
            Self::Abbreviated(receipt) => Ok(receipt.clone()),
            Self::Full(transaction) => transaction.abbreviate(),
        }
    }
}

/// A box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub header: ContractHeader,
    pub box_type: BoxType,
    entries: BTreeMap<TransactionNumber, LedgerEntry>,
}

impl Ledger {
    /// Empty box.
    pub fn new(box_type: BoxType, header: ContractHeader) -> Self {
        Self {
            header,
            box_type,
            entries: BTreeMap::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the box is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by number.
    pub fn get(&self, number: TransactionNumber) -> Option<&LedgerEntry> {
        self.entries.get(&number)
    }

    /// Entries in number order.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    /// Entry numbers in order.
    pub fn numbers(&self) -> Vec<TransactionNumber> {
        self.entries.keys().copied().collect()
    }

    /// Add a full transaction, replacing any entry with the same number.
    pub fn add_transaction(&mut self, transaction: Transaction) -> bool {
        self.entries
            .insert(transaction.number, LedgerEntry::Full(transaction))
            .is_none()
    }

    /// Add an abbreviated entry. Returns false if the number is present.
    pub fn add_abbreviated(&mut self, receipt: AbbreviatedReceipt) -> bool {
        if self.entries.contains_key(&receipt.number) {
            return false;
        }
        self.entries
            .insert(receipt.number, LedgerEntry::Abbreviated(receipt));
        true
    }

    /// Remove an entry.
    pub fn remove(&mut self, number: TransactionNumber) -> Option<LedgerEntry> {
        self.entries.remove(&number)
    }

    /// Entries still waiting for their receipt.
    pub fn missing_receipts(&self) -> Vec<TransactionNumber> {
        self.entries
            .values()
            .filter(|entry| entry.is_abbreviated())
            .map(LedgerEntry::number)
            .collect()
    }

    /// Replace an abbreviated entry with its downloaded receipt.
    pub fn attach_receipt(&mut self, transaction: Transaction) -> Result<(), ContextError> {
        let number = transaction.number;
        match self.entries.get(&number) {
            None => Err(ContextError::NotFound(format!(
                "{} entry {number}",
                self.box_type.as_str()
            ))),
            Some(LedgerEntry::Full(_)) => Ok(()),
            Some(LedgerEntry::Abbreviated(receipt)) => {
                if receipt.receipt_hash != transaction.receipt_hash()? {
                    return Err(ContextError::ProtocolViolation(format!(
                        "receipt {number} does not match its box entry"
                    )));
                }
                if receipt.transaction_type != transaction.transaction_type() {
                    return Err(ContextError::ProtocolViolation(format!(
                        "receipt {number} has the wrong type"
                    )));
                }
                self.entries.insert(number, LedgerEntry::Full(transaction));
                Ok(())
            }
        }
    }

    /// Copy of this box with every entry abbreviated.
    pub fn abbreviated(&self) -> Result<Ledger, ContextError> {
        let mut ledger = Ledger::new(self.box_type, self.header.clone());
        for entry in self.entries.values() {
            ledger.add_abbreviated(entry.abbreviated()?);
        }
        Ok(ledger)
    }

    /// Content hash over the abbreviated listing, so downloading receipts
    /// does not change it.
    pub fn content_hash(&self) -> Result<Hash, ContextError> {
        let mut hasher = ContentHasher::new(LEDGER_DOMAIN);
        hasher.update_field(self.box_type.as_str().as_bytes());
        hasher.update_field(self.header.nym_id.as_str().as_bytes());
        hasher.update_field(self.header.notary_id.as_str().as_bytes());
        for entry in self.entries.values() {
            let receipt = entry.abbreviated()?;
            hasher.update_field(&bincode::serialize(&receipt)?);
        }
        Ok(hasher.finalize())
    }

    /// Encode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContextError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContextError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl Signable for Ledger {
    fn contract_name(&self) -> &'static str {
        self.box_type.as_str()
    }

    fn signer_role(&self) -> SignerRole {
        self.header.signer
    }

    // Covers the abbreviated listing so downloaded receipts keep the
    // notary signature valid.
    fn signing_bytes(&self) -> Result<Vec<u8>, ContextError> {
        let mut unsigned = self.abbreviated()?;
        unsigned.header.signature.clear();
        Ok(ledger_hash(&unsigned.to_bytes()?).to_vec())
    }

    fn signature(&self) -> &[u8] {
        &self.header.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.header.signature = signature;
    }
}
