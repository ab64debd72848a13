//! # Context and Box Storage
//!
//! Persists context records, boxes and box receipts through the
//! [`KeyValueStore`] port.
//!
//! | Key | Value |
//! |-----|-------|
//! | `context/<nym>/<notary>` | [`ContextRecord`] |
//! | `ledger/<nym>/<notary>/<box>[/<account>]` | abbreviated [`Ledger`] |
//! | `receipt/<nym>/<notary>/<box>[/<account>]/<number>` | full [`Transaction`] |

use crate::domain::{ContextError, ContextRecord, Ledger, LedgerEntry, Transaction};
use crate::ports::{BatchOperation, KeyValueStore};
use shared_types::{AccountId, BoxType, NotaryId, NymId, TransactionNumber};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Identifies one box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxLocation<'a> {
    pub nym: &'a NymId,
    pub notary: &'a NotaryId,
    pub box_type: BoxType,
    pub account: Option<&'a AccountId>,
}

impl BoxLocation<'_> {
    fn path(&self) -> String {
        match self.account {
            Some(account) => format!(
                "{}/{}/{}/{}",
                self.nym,
                self.notary,
                self.box_type.as_str(),
                account
            ),
            None => format!("{}/{}/{}", self.nym, self.notary, self.box_type.as_str()),
        }
    }

    fn ledger_key(&self) -> Vec<u8> {
        format!("ledger/{}", self.path()).into_bytes()
    }

    fn receipt_prefix(&self) -> Vec<u8> {
        format!("receipt/{}/", self.path()).into_bytes()
    }

    fn receipt_key(&self, number: TransactionNumber) -> Vec<u8> {
        format!("receipt/{}/{number}", self.path()).into_bytes()
    }
}

/// Storage for one wallet.
#[derive(Clone)]
pub struct LedgerRepository {
    store: Arc<dyn KeyValueStore>,
}

impl LedgerRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn context_key(nym: &NymId, notary: &NotaryId) -> Vec<u8> {
        format!("context/{nym}/{notary}").into_bytes()
    }

    /// Load a context record.
    pub fn load_context(
        &self,
        nym: &NymId,
        notary: &NotaryId,
    ) -> Result<Option<ContextRecord>, ContextError> {
        self.store
            .get(&Self::context_key(nym, notary))?
            .map(|bytes| ContextRecord::from_bytes(&bytes))
            .transpose()
    }

    /// Save a context record.
    pub fn save_context(&self, record: &ContextRecord) -> Result<(), ContextError> {
        self.store.put(
            &Self::context_key(&record.nym_id, &record.notary_id),
            &record.to_bytes()?,
        )
    }

    /// Delete a context record.
    pub fn delete_context(&self, nym: &NymId, notary: &NotaryId) -> Result<(), ContextError> {
        self.store.delete(&Self::context_key(nym, notary))
    }

    /// Load a box with every stored receipt attached.
    pub fn load_ledger(&self, location: &BoxLocation<'_>) -> Result<Option<Ledger>, ContextError> {
        let Some(bytes) = self.store.get(&location.ledger_key())? else {
            return Ok(None);
        };
        let mut ledger = Ledger::from_bytes(&bytes)?;

        for number in ledger.missing_receipts() {
            let Some(bytes) = self.store.get(&location.receipt_key(number))? else {
                continue;
            };
            let attached = Transaction::from_bytes(&bytes)
                .and_then(|receipt| ledger.attach_receipt(receipt));
            if let Err(e) = attached {
                warn!(number, box_type = location.box_type.as_str(), error = %e, "Discarding stored receipt");
                self.store.delete(&location.receipt_key(number))?;
            }
        }

        Ok(Some(ledger))
    }

    /// Save a box. Receipts for entries no longer in the box are deleted.
    pub fn save_ledger(&self, location: &BoxLocation<'_>, ledger: &Ledger) -> Result<(), ContextError> {
        let mut operations = vec![BatchOperation::put(
            location.ledger_key(),
            ledger.abbreviated()?.to_bytes()?,
        )];

        let present: BTreeSet<Vec<u8>> = ledger
            .numbers()
            .into_iter()
            .map(|n| location.receipt_key(n))
            .collect();
        for (key, _) in self.store.prefix_scan(&location.receipt_prefix())? {
            if !present.contains(&key) {
                operations.push(BatchOperation::delete(key));
            }
        }

        for entry in ledger.entries() {
            if let LedgerEntry::Full(transaction) = entry {
                operations.push(BatchOperation::put(
                    location.receipt_key(transaction.number),
                    transaction.to_bytes()?,
                ));
            }
        }

        self.store.atomic_batch_write(operations)
    }

    /// Delete a box and its receipts.
    pub fn delete_ledger(&self, location: &BoxLocation<'_>) -> Result<(), ContextError> {
        let mut operations = vec![BatchOperation::delete(location.ledger_key())];
        for (key, _) in self.store.prefix_scan(&location.receipt_prefix())? {
            operations.push(BatchOperation::delete(key));
        }
        self.store.atomic_batch_write(operations)
    }

    /// Load one stored receipt.
    pub fn load_receipt(
        &self,
        location: &BoxLocation<'_>,
        number: TransactionNumber,
    ) -> Result<Option<Transaction>, ContextError> {
        self.store
            .get(&location.receipt_key(number))?
            .map(|bytes| Transaction::from_bytes(&bytes))
            .transpose()
    }
}
