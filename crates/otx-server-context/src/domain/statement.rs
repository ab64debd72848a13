//! # Transaction Statement
//!
//! An immutable declaration of which numbers the nym holds at one notary.

use crate::domain::errors::ContextError;
use serde::{Deserialize, Serialize};
use shared_types::{NotaryId, NumberSet};

/// Issued and available numbers at signing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatement {
    notary: NotaryId,
    issued: NumberSet,
    available: NumberSet,
}

impl TransactionStatement {
    /// Create a statement.
    pub fn new(notary: NotaryId, issued: NumberSet, available: NumberSet) -> Self {
        Self {
            notary,
            issued,
            available,
        }
    }

    /// Notary the statement is addressed to.
    pub fn notary(&self) -> &NotaryId {
        &self.notary
    }

    /// Numbers the nym is responsible for.
    pub fn issued(&self) -> &NumberSet {
        &self.issued
    }

    /// Numbers not yet spent.
    pub fn available(&self) -> &NumberSet {
        &self.available
    }

    /// Check that every issued number in `newer` is explained by this
    /// statement or by the numbers in `added`.
    pub fn explains(&self, newer: &TransactionStatement, added: &NumberSet) -> Result<(), ContextError> {
        if newer.notary != self.notary {
            return Err(ContextError::WrongNotary {
                expected: self.notary.clone(),
                actual: newer.notary.clone(),
            });
        }

        let unexplained: Vec<_> = newer
            .issued
            .iter()
            .filter(|n| !self.issued.contains(n) && !added.contains(n))
            .collect();

        if unexplained.is_empty() {
            Ok(())
        } else {
            Err(ContextError::ProtocolViolation(format!(
                "statement gained unaccounted numbers {unexplained:?}"
            )))
        }
    }

    /// Encode for attachment to an item.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContextError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode an attached statement.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContextError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
