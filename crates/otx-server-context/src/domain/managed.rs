//! # Managed Transaction Numbers
//!
//! A number checked out of the book for one outgoing request. Dropping the
//! handle without marking it successful returns the number to `available`.
//!
//! The handle locks the number book on drop, so it must never be dropped
//! while that lock is held.

use crate::domain::numbers::TransactionNumbers;
use parking_lot::Mutex;
use shared_types::TransactionNumber;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// The number book shared between a context and its managed numbers.
pub type SharedNumbers = Arc<Mutex<TransactionNumbers>>;

/// RAII handle for a checked-out transaction number.
pub struct ManagedNumber {
    number: TransactionNumber,
    success: bool,
    book: Weak<Mutex<TransactionNumbers>>,
}

impl ManagedNumber {
    pub(crate) fn new(number: TransactionNumber, book: &SharedNumbers) -> Self {
        Self {
            number,
            success: false,
            book: Arc::downgrade(book),
        }
    }

    /// The "no number" sentinel.
    pub fn invalid() -> Self {
        Self {
            number: 0,
            success: false,
            book: Weak::new(),
        }
    }

    /// The wrapped number (0 for the sentinel).
    pub fn value(&self) -> TransactionNumber {
        self.number
    }

    /// False for the sentinel.
    pub fn valid(&self) -> bool {
        self.number != 0
    }

    /// Mark whether the request using this number was accepted.
    pub fn set_success(&mut self, success: bool) {
        self.success = success;
    }

    /// True once marked successful.
    pub fn success(&self) -> bool {
        self.success
    }
}

impl fmt::Debug for ManagedNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedNumber")
            .field("number", &self.number)
            .field("success", &self.success)
            .finish()
    }
}

impl Drop for ManagedNumber {
    fn drop(&mut self) {
        if self.success || !self.valid() {
            return;
        }
        if let Some(book) = self.book.upgrade() {
            let recovered = book.lock().recover_available(self.number);
            debug!(number = self.number, recovered, "Returning unused transaction number");
        }
    }
}
