//! Ed25519 implementation of the signing capability.

use crate::domain::{ContextError, SignerRole};
use crate::ports::ContractSigner;
use shared_crypto::{Ed25519KeyPair, Ed25519PublicKey};
use shared_types::{NotaryId, NymId};
use std::collections::HashMap;

/// Signs as one nym and verifies the notaries it knows.
pub struct Ed25519Signer {
    nym_id: NymId,
    keypair: Ed25519KeyPair,
    notaries: HashMap<NotaryId, Ed25519PublicKey>,
}

impl Ed25519Signer {
    /// Signer for `nym_id` holding `keypair`.
    pub fn new(nym_id: NymId, keypair: Ed25519KeyPair) -> Self {
        Self {
            nym_id,
            keypair,
            notaries: HashMap::new(),
        }
    }

    /// Trust `key` as the signing key of `notary`.
    pub fn with_notary(mut self, notary: NotaryId, key: Ed25519PublicKey) -> Self {
        self.notaries.insert(notary, key);
        self
    }

    /// The nym's public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }
}

impl ContractSigner for Ed25519Signer {
    fn nym_id(&self) -> &NymId {
        &self.nym_id
    }

    fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>, ContextError> {
        Ok(self.keypair.sign(bytes).to_vec())
    }

    fn verify(
        &self,
        role: SignerRole,
        notary: &NotaryId,
        bytes: &[u8],
        signature: &[u8],
    ) -> Result<(), ContextError> {
        let key = match role {
            SignerRole::Nym => self.keypair.public_key(),
            SignerRole::Notary => *self
                .notaries
                .get(notary)
                .ok_or_else(|| ContextError::NotFound(format!("key for notary {notary}")))?,
        };
        Ok(key.verify_slice(bytes, signature)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_own_and_notary() {
        let notary_key = Ed25519KeyPair::from_seed([2; 32]);
        let signer = Ed25519Signer::new(NymId::new("nym"), Ed25519KeyPair::from_seed([1; 32]))
            .with_notary(NotaryId::new("notary"), notary_key.public_key());

        let own = signer.sign(b"ledger").unwrap();
        assert!(signer
            .verify(SignerRole::Nym, &NotaryId::new("notary"), b"ledger", &own)
            .is_ok());

        let theirs = notary_key.sign(b"reply").to_vec();
        assert!(signer
            .verify(SignerRole::Notary, &NotaryId::new("notary"), b"reply", &theirs)
            .is_ok());
        assert!(signer
            .verify(SignerRole::Notary, &NotaryId::new("notary"), b"reply", &own)
            .is_err());
    }

    #[test]
    fn test_unknown_notary() {
        let signer = Ed25519Signer::new(NymId::new("nym"), Ed25519KeyPair::from_seed([1; 32]));
        assert!(matches!(
            signer.verify(SignerRole::Notary, &NotaryId::new("x"), b"m", &[0; 64]),
            Err(ContextError::NotFound(_))
        ));
    }
}
