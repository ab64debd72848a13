//! # Inbound Ports (Driving Ports)
//!
//! Synchronous bookkeeping API used by wallet code that builds transactions.

use crate::domain::{ContextError, ManagedNumber, TransactionStatement};
use shared_types::{MessageType, NumberSet, TransactionNumber};

/// Transaction-number bookkeeping offered by a notary context.
pub trait TransactionNumberApi: Send + Sync {
    /// Check out a number for a request of type `purpose`. Returns the
    /// sentinel when none can be spared.
    fn next_transaction_number(&self, purpose: MessageType) -> ManagedNumber;

    /// Numbers currently issued.
    fn issued(&self) -> NumberSet;

    /// Numbers currently available.
    fn available(&self) -> NumberSet;

    /// Count of available numbers.
    fn available_count(&self) -> usize;

    /// Close a number the notary has finalized.
    fn consume_issued(&self, number: TransactionNumber) -> bool;

    /// Return a number to the pool.
    fn recover_available(&self, number: TransactionNumber) -> bool;

    /// Statement of the current numbers after applying changes.
    fn statement(&self, adding: &NumberSet, removing: &NumberSet) -> TransactionStatement;

    /// Compare a notary statement with the local view.
    fn verify_statement(
        &self,
        statement: &TransactionStatement,
        excluded: &NumberSet,
        included: &NumberSet,
    ) -> Result<(), ContextError>;
}
