//! # Transaction Number Book
//!
//! The three number sets a nym holds at one notary plus the high-water mark.
//!
//! ## Invariants
//!
//! - `available ⊆ issued`
//! - `tentative ∩ issued = ∅`
//! - `highest` never moves backwards

use crate::domain::errors::ContextError;
use crate::domain::statement::TransactionStatement;
use serde::{Deserialize, Serialize};
use shared_types::{MessageType, NotaryId, NumberSet, TransactionNumber};
use tracing::debug;

/// Numbers split by the high-water mark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumberPartition {
    /// Strictly above the mark.
    pub good: NumberSet,
    /// At or below the mark (replayed or stale).
    pub bad: NumberSet,
}

/// Numbers changed by a resync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Issued by the notary but missing locally.
    pub restored: NumberSet,
    /// Held locally but no longer issued by the notary.
    pub dropped: NumberSet,
}

impl ResyncReport {
    /// True when local and notary views already agreed.
    pub fn is_clean(&self) -> bool {
        self.restored.is_empty() && self.dropped.is_empty()
    }
}

/// Partition `numbers` into those above `highest` and the rest.
pub fn validate_number_set(numbers: &NumberSet, highest: TransactionNumber) -> NumberPartition {
    let (good, bad) = numbers.iter().partition(|&&n| n > highest);
    NumberPartition { good, bad }
}

/// Issued, available and tentative numbers at one notary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionNumbers {
    highest: TransactionNumber,
    issued: NumberSet,
    available: NumberSet,
    tentative: NumberSet,
}

impl TransactionNumbers {
    /// Empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book from persisted sets. Available numbers that are not
    /// issued are discarded and tentative numbers already issued are dropped.
    pub fn from_parts(
        highest: TransactionNumber,
        issued: NumberSet,
        available: NumberSet,
        tentative: NumberSet,
    ) -> Self {
        let available = available.intersection(&issued).copied().collect();
        let tentative = tentative.difference(&issued).copied().collect();
        Self {
            highest,
            issued,
            available,
            tentative,
        }
    }

    /// High-water mark.
    pub fn highest(&self) -> TransactionNumber {
        self.highest
    }

    /// Issued numbers.
    pub fn issued(&self) -> &NumberSet {
        &self.issued
    }

    /// Available numbers.
    pub fn available(&self) -> &NumberSet {
        &self.available
    }

    /// Tentative numbers.
    pub fn tentative(&self) -> &NumberSet {
        &self.tentative
    }

    /// Count of available numbers.
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// True if `number` is issued.
    pub fn verify_issued(&self, number: TransactionNumber) -> bool {
        self.issued.contains(&number)
    }

    /// True if `number` is available.
    pub fn verify_available(&self, number: TransactionNumber) -> bool {
        self.available.contains(&number)
    }

    /// True if `number` is tentative.
    pub fn verify_tentative(&self, number: TransactionNumber) -> bool {
        self.tentative.contains(&number)
    }

    /// Move the high-water mark forward. Returns false if `number` is behind it.
    pub fn set_highest(&mut self, number: TransactionNumber) -> bool {
        if number < self.highest {
            return false;
        }
        self.highest = number;
        true
    }

    /// Record a number seen in a blank notice. Numbers at or below the
    /// high-water mark were already seen and are refused.
    pub fn add_tentative(&mut self, number: TransactionNumber) -> bool {
        if number <= self.highest || self.issued.contains(&number) {
            debug!(number, highest = self.highest, "Refusing tentative number");
            return false;
        }
        self.tentative.insert(number)
    }

    /// Forget a tentative number.
    pub fn remove_tentative(&mut self, number: TransactionNumber) -> bool {
        self.tentative.remove(&number)
    }

    /// Promote one tentative number to issued and available.
    pub fn accept_issued(&mut self, number: TransactionNumber) -> bool {
        if !self.tentative.contains(&number) || self.issued.contains(&number) {
            return false;
        }
        self.tentative.remove(&number);
        if number > self.highest {
            self.highest = number;
        }
        self.issue_number(number)
    }

    /// Promote every tentative number in `statement` that clears the
    /// high-water mark.
    ///
    /// Returns true only if every number in the statement was added.
    /// Promotions that succeeded are kept even when the result is false.
    pub fn accept_issued_statement(&mut self, statement: &TransactionStatement) -> bool {
        let offered = statement.issued().len();
        if offered == 0 {
            return false;
        }

        let adding: NumberSet = statement
            .issued()
            .iter()
            .filter(|n| self.tentative.contains(n) && !self.issued.contains(n))
            .copied()
            .collect();

        let partition = self.update_highest(&adding);
        let mut added = 0;
        for number in partition.good {
            if self.issue_number(number) {
                self.tentative.remove(&number);
                added += 1;
            }
        }

        if !partition.bad.is_empty() {
            debug!(rejected = ?partition.bad, "Stale numbers in statement");
        }

        added == offered
    }

    /// Validate `numbers` against the mark and advance it to the largest
    /// good number.
    pub fn update_highest(&mut self, numbers: &NumberSet) -> NumberPartition {
        let partition = validate_number_set(numbers, self.highest);
        if let Some(&max) = partition.good.iter().next_back() {
            debug!(from = self.highest, to = max, "Advancing highest transaction number");
            self.highest = max;
        }
        partition
    }

    /// Take the lowest available number for a request of type `purpose`.
    ///
    /// `processInbox` may use the last number; every other purpose must
    /// leave one behind.
    pub fn next_number(&mut self, purpose: MessageType) -> Result<TransactionNumber, ContextError> {
        let reserve = if purpose == MessageType::ProcessInbox { 0 } else { 1 };
        if self.available.len() <= reserve {
            return Err(ContextError::NoAvailableNumber {
                available: self.available.len(),
            });
        }
        self.available
            .pop_first()
            .ok_or(ContextError::NoAvailableNumber { available: 0 })
    }

    /// Forget a number the notary has closed.
    pub fn consume_issued(&mut self, number: TransactionNumber) -> bool {
        self.available.remove(&number);
        self.issued.remove(&number)
    }

    /// Mark an issued number as spent without closing it.
    pub fn consume_available(&mut self, number: TransactionNumber) -> bool {
        self.available.remove(&number)
    }

    /// Return a number to the pool. Only numbers still issued come back.
    pub fn recover_available(&mut self, number: TransactionNumber) -> bool {
        if !self.issued.contains(&number) {
            return false;
        }
        self.available.insert(number)
    }

    /// Reconcile with the notary's authoritative issued list.
    pub fn resync(&mut self, server_issued: &NumberSet) -> ResyncReport {
        let restored: NumberSet = server_issued.difference(&self.issued).copied().collect();
        let dropped: NumberSet = self.issued.difference(server_issued).copied().collect();

        for number in &dropped {
            self.issued.remove(number);
            self.available.remove(number);
        }
        for number in &restored {
            self.tentative.remove(number);
            self.issue_number(*number);
        }
        if let Some(&max) = server_issued.iter().next_back() {
            if max > self.highest {
                self.highest = max;
            }
        }

        ResyncReport { restored, dropped }
    }

    /// Statement of the current sets after adding and removing numbers.
    pub fn statement(
        &self,
        notary: NotaryId,
        adding: &NumberSet,
        removing: &NumberSet,
    ) -> TransactionStatement {
        let apply = |set: &NumberSet| -> NumberSet {
            set.union(adding)
                .filter(|n| !removing.contains(n))
                .copied()
                .collect()
        };
        TransactionStatement::new(notary, apply(&self.issued), apply(&self.available))
    }

    /// Compare a notary statement with the local issued set.
    ///
    /// Local numbers in `excluded` may be missing from the statement and
    /// numbers in `included` may appear in it without being issued locally.
    pub fn verify_statement(
        &self,
        statement: &TransactionStatement,
        excluded: &NumberSet,
        included: &NumberSet,
    ) -> Result<(), ContextError> {
        for number in statement.issued() {
            if !self.issued.contains(number) && !included.contains(number) {
                return Err(ContextError::ProtocolViolation(format!(
                    "notary lists number {number} not issued locally"
                )));
            }
        }
        for number in self.issued.difference(excluded) {
            if !statement.issued().contains(number) {
                return Err(ContextError::ProtocolViolation(format!(
                    "notary statement is missing number {number}"
                )));
            }
        }
        Ok(())
    }

    fn issue_number(&mut self, number: TransactionNumber) -> bool {
        let added = self.issued.insert(number);
        self.available.insert(number);
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(numbers: &[i64]) -> NumberSet {
        numbers.iter().copied().collect()
    }

    fn book_with_issued(numbers: &[i64]) -> TransactionNumbers {
        let mut book = TransactionNumbers::new();
        for &n in numbers {
            assert!(book.add_tentative(n));
            assert!(book.accept_issued(n));
        }
        book
    }

    fn notary() -> NotaryId {
        NotaryId::new("notary")
    }

    #[test]
    fn test_add_tentative_respects_highest() {
        let mut book = TransactionNumbers::new();
        book.set_highest(10);
        assert!(!book.add_tentative(9));
        assert!(!book.add_tentative(10));
        assert!(book.add_tentative(11));
        assert!(!book.add_tentative(11));
    }

    #[test]
    fn test_number_at_highest_never_lingers_in_tentative() {
        let mut book = TransactionNumbers::new();
        book.set_highest(10);
        assert!(!book.add_tentative(10));
        assert!(book.tentative().is_empty());

        assert!(book.add_tentative(11));
        let statement = TransactionStatement::new(notary(), set(&[11]), set(&[11]));
        assert!(book.accept_issued_statement(&statement));
        assert!(book.tentative().is_empty());
        assert!(book.verify_issued(11));
    }

    #[test]
    fn test_accept_issued_requires_tentative() {
        let mut book = TransactionNumbers::new();
        assert!(!book.accept_issued(5));
        book.add_tentative(5);
        assert!(book.accept_issued(5));
        assert!(book.verify_issued(5));
        assert!(book.verify_available(5));
        assert!(!book.verify_tentative(5));
        assert_eq!(book.highest(), 5);
    }

    #[test]
    fn test_accept_statement_all_numbers() {
        let mut book = TransactionNumbers::new();
        for n in [5, 6, 7] {
            book.add_tentative(n);
        }
        let statement = TransactionStatement::new(notary(), set(&[5, 6, 7]), set(&[5, 6, 7]));
        assert!(book.accept_issued_statement(&statement));
        assert_eq!(book.issued(), &set(&[5, 6, 7]));
        assert_eq!(book.highest(), 7);
        assert!(book.tentative().is_empty());
    }

    #[test]
    fn test_accept_statement_partial_commit() {
        let mut book = TransactionNumbers::new();
        book.add_tentative(5);
        book.add_tentative(6);
        // 7 was never tentative
        let statement = TransactionStatement::new(notary(), set(&[5, 6, 7]), set(&[5, 6, 7]));
        assert!(!book.accept_issued_statement(&statement));
        assert_eq!(book.issued(), &set(&[5, 6]));
        assert!(book.tentative().is_empty());
    }

    #[test]
    fn test_accept_statement_rejects_stale() {
        let mut book = TransactionNumbers::new();
        book.add_tentative(5);
        book.set_highest(8);
        let statement = TransactionStatement::new(notary(), set(&[5]), set(&[5]));
        assert!(!book.accept_issued_statement(&statement));
        assert!(book.verify_tentative(5));
        assert!(!book.verify_issued(5));
    }

    #[test]
    fn test_accept_empty_statement_fails() {
        let mut book = TransactionNumbers::new();
        let statement = TransactionStatement::new(notary(), NumberSet::new(), NumberSet::new());
        assert!(!book.accept_issued_statement(&statement));
    }

    #[test]
    fn test_update_highest_partition() {
        let mut book = TransactionNumbers::new();
        book.set_highest(10);
        let partition = book.update_highest(&set(&[4, 10, 11, 15]));
        assert_eq!(partition.good, set(&[11, 15]));
        assert_eq!(partition.bad, set(&[4, 10]));
        assert_eq!(book.highest(), 15);
    }

    #[test]
    fn test_update_highest_all_bad_keeps_mark() {
        let mut book = TransactionNumbers::new();
        book.set_highest(10);
        let partition = book.update_highest(&set(&[1, 2]));
        assert!(partition.good.is_empty());
        assert_eq!(book.highest(), 10);
    }

    #[test]
    fn test_next_number_reserves_one() {
        let mut book = book_with_issued(&[1, 2]);
        assert_eq!(book.next_number(MessageType::NotarizeTransaction), Ok(1));
        assert!(matches!(
            book.next_number(MessageType::NotarizeTransaction),
            Err(ContextError::NoAvailableNumber { available: 1 })
        ));
        assert_eq!(book.next_number(MessageType::ProcessInbox), Ok(2));
        assert!(book.next_number(MessageType::ProcessInbox).is_err());
    }

    #[test]
    fn test_consume_and_recover() {
        let mut book = book_with_issued(&[1, 2, 3]);
        assert!(book.consume_available(2));
        assert!(book.verify_issued(2));
        assert!(book.recover_available(2));
        assert!(book.consume_issued(2));
        assert!(!book.consume_issued(2));
        assert!(!book.recover_available(2));
        assert!(!book.verify_available(2));
    }

    #[test]
    fn test_set_highest_forward_only() {
        let mut book = TransactionNumbers::new();
        assert!(book.set_highest(5));
        assert!(!book.set_highest(4));
        assert_eq!(book.highest(), 5);
    }

    #[test]
    fn test_resync_restores_and_drops() {
        let mut book = book_with_issued(&[1, 2, 3]);
        book.add_tentative(9);
        let report = book.resync(&set(&[2, 3, 9]));
        assert_eq!(report.restored, set(&[9]));
        assert_eq!(report.dropped, set(&[1]));
        assert_eq!(book.issued(), &set(&[2, 3, 9]));
        assert!(book.verify_available(9));
        assert!(!book.verify_tentative(9));
        assert_eq!(book.highest(), 9);
    }

    #[test]
    fn test_statement_applies_changes() {
        let book = book_with_issued(&[1, 2, 3]);
        let statement = book.statement(notary(), &set(&[7]), &set(&[1]));
        assert_eq!(statement.issued(), &set(&[2, 3, 7]));
    }

    #[test]
    fn test_verify_statement() {
        let book = book_with_issued(&[1, 2, 3]);
        let exact = TransactionStatement::new(notary(), set(&[1, 2, 3]), set(&[]));
        assert!(book.verify_statement(&exact, &set(&[]), &set(&[])).is_ok());

        let extra = TransactionStatement::new(notary(), set(&[1, 2, 3, 4]), set(&[]));
        assert!(book.verify_statement(&extra, &set(&[]), &set(&[])).is_err());
        assert!(book.verify_statement(&extra, &set(&[]), &set(&[4])).is_ok());

        let missing = TransactionStatement::new(notary(), set(&[2, 3]), set(&[]));
        assert!(book.verify_statement(&missing, &set(&[]), &set(&[])).is_err());
        assert!(book.verify_statement(&missing, &set(&[1]), &set(&[])).is_ok());
    }

    #[test]
    fn test_from_parts_enforces_subset() {
        let book = TransactionNumbers::from_parts(3, set(&[1, 2]), set(&[2, 5]), set(&[2, 8]));
        assert_eq!(book.available(), &set(&[2]));
        assert_eq!(book.tentative(), &set(&[8]));
    }

    #[derive(Debug, Clone)]
    enum Op {
        AddTentative(i64),
        AcceptIssued(i64),
        Next(bool),
        Consume(i64),
        ConsumeAvailable(i64),
        Recover(i64),
        Resync(Vec<i64>),
        UpdateHighest(Vec<i64>),
    }

    fn op() -> impl Strategy<Value = Op> {
        let n = 0i64..40;
        prop_oneof![
            n.clone().prop_map(Op::AddTentative),
            n.clone().prop_map(Op::AcceptIssued),
            any::<bool>().prop_map(Op::Next),
            n.clone().prop_map(Op::Consume),
            n.clone().prop_map(Op::ConsumeAvailable),
            n.clone().prop_map(Op::Recover),
            prop::collection::vec(n.clone(), 0..8).prop_map(Op::Resync),
            prop::collection::vec(n, 0..8).prop_map(Op::UpdateHighest),
        ]
    }

    proptest! {
        #[test]
        fn prop_book_invariants_hold(ops in prop::collection::vec(op(), 0..60)) {
            let mut book = TransactionNumbers::new();
            let mut previous_highest = book.highest();
            for op in ops {
                match op {
                    Op::AddTentative(n) => { book.add_tentative(n); }
                    Op::AcceptIssued(n) => { book.accept_issued(n); }
                    Op::Next(inbox) => {
                        let purpose = if inbox { MessageType::ProcessInbox } else { MessageType::NotarizeTransaction };
                        let _ = book.next_number(purpose);
                    }
                    Op::Consume(n) => { book.consume_issued(n); }
                    Op::ConsumeAvailable(n) => { book.consume_available(n); }
                    Op::Recover(n) => { book.recover_available(n); }
                    Op::Resync(v) => { book.resync(&v.into_iter().collect()); }
                    Op::UpdateHighest(v) => { book.update_highest(&v.into_iter().collect()); }
                }
                prop_assert!(book.available().is_subset(book.issued()));
                prop_assert!(book.tentative().is_disjoint(book.issued()));
                prop_assert!(book.highest() >= previous_highest);
                previous_highest = book.highest();
            }
        }

        #[test]
        fn prop_partition_is_exact(numbers in prop::collection::btree_set(-50i64..50, 0..20), highest in -50i64..50) {
            let partition = validate_number_set(&numbers, highest);
            prop_assert!(partition.good.iter().all(|&n| n > highest));
            prop_assert!(partition.bad.iter().all(|&n| n <= highest));
            prop_assert_eq!(partition.good.len() + partition.bad.len(), numbers.len());
        }
    }
}
