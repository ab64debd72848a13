//! # Outbound Ports (Driven Ports)
//!
//! Capabilities the context needs from its host: a connection to the notary,
//! a key holder for signing and verification, durable storage, and a wallet
//! collaborator told about reply content.

use crate::domain::{ContextError, NetworkReply, Signable, SignerRole};
use async_trait::async_trait;
use shared_types::{AccountId, Message, NotaryId, NymId, TransactionNumber};

/// Connection to one notary.
///
/// Implementations apply their own send timeout; the context applies a
/// ceiling on top of it.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// Send a signed request and wait for the reply.
    async fn send(&self, message: &Message, push: bool) -> NetworkReply;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// Holder of the nym's signing key and the notaries' public keys.
pub trait ContractSigner: Send + Sync {
    /// The nym whose key signs.
    fn nym_id(&self) -> &NymId;

    /// Sign `bytes` with the nym key.
    fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>, ContextError>;

    /// Verify a signature by `role`. `notary` selects the notary key.
    fn verify(
        &self,
        role: SignerRole,
        notary: &NotaryId,
        bytes: &[u8],
        signature: &[u8],
    ) -> Result<(), ContextError>;
}

/// Sign a contract with the nym key.
pub fn sign_contract<S: Signable>(signer: &dyn ContractSigner, contract: &mut S) -> Result<(), ContextError> {
    let bytes = contract.signing_bytes()?;
    let signature = signer.sign(&bytes)?;
    contract.set_signature(signature);
    Ok(())
}

/// Verify a contract against the key of its declared signer.
pub fn verify_contract<S: Signable>(
    signer: &dyn ContractSigner,
    notary: &NotaryId,
    contract: &S,
) -> Result<(), ContextError> {
    if contract.signature().is_empty() {
        return Err(ContextError::InvalidSignature(format!(
            "unsigned {}",
            contract.contract_name()
        )));
    }
    let bytes = contract.signing_bytes()?;
    signer
        .verify(contract.signer_role(), notary, &bytes, contract.signature())
        .map_err(|_| ContextError::InvalidSignature(contract.contract_name().to_string()))
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Abstract key-value store, shared by every context of a wallet.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key. A missing key is `Ok(None)`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContextError>;

    /// Put a single key-value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ContextError>;

    /// Delete a key. Deleting a missing key succeeds.
    fn delete(&self, key: &[u8]) -> Result<(), ContextError>;

    /// Apply all operations or none.
    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), ContextError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, ContextError>;

    /// Keys and values under a prefix.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContextError>;
}

/// Wallet-side collaborator told about reply content the context does not
/// own. Every method defaults to doing nothing.
pub trait ReplyObserver: Send + Sync {
    /// A nym message arrived in the nymbox.
    fn nym_message_received(&self, _notary: &NotaryId, _payload: &[u8]) {}

    /// An instrument notice arrived in the nymbox.
    fn instrument_notice_received(&self, _notary: &NotaryId, _payload: &[u8]) {}

    /// A notary notice arrived in the nymbox.
    fn notice_received(&self, _notary: &NotaryId, _payload: &[u8]) {}

    /// A cron item finished.
    fn final_receipt_received(&self, _notary: &NotaryId, _opening_number: TransactionNumber) {}

    /// Account contract and boxes were refreshed.
    fn account_data_received(&self, _account: &AccountId, _account_contract: &[u8]) {}

    /// A reply whose content belongs to the wallet (mints, market data,
    /// contracts, nym lookups).
    fn reply_received(&self, _reply: &Message) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ReplyObserver for NoopObserver {}
