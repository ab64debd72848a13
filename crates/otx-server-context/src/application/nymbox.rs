//! # Nymbox Acceptance
//!
//! Builds the `processNymbox` transaction that accepts everything in the
//! local nymbox, applying the local side effects of each entry as it goes.

use crate::application::context::ServerContext;
use crate::domain::{
    ContextError, ContractHeader, Item, ItemKind, Ledger, SignerRole, Transaction,
    TransactionKind,
};
use crate::ports::{sign_contract, verify_contract, TransactionNumberApi};
use shared_types::{NumberSet, TransactionNumber};
use tracing::{debug, warn};

/// Items sent in a `processNymbox`, kept until the reply arrives.
#[derive(Debug, Clone, Default)]
pub(crate) struct NymboxAcceptance {
    items: Vec<Item>,
}

impl NymboxAcceptance {
    /// The item sent for nymbox entry `number`.
    pub(crate) fn item(&self, number: TransactionNumber) -> Option<&Item> {
        self.items.iter().find(|item| item.in_reference_to == number)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

/// What to do with the local nymbox.
#[derive(Debug)]
pub(crate) enum NymboxAction {
    /// Nothing to accept.
    Nothing,
    /// Only reply notices that were already processed.
    AlreadySeen(usize),
    /// Send this transaction.
    Accept(Transaction, NymboxAcceptance),
}

impl ServerContext {
    /// Accept every entry in `nymbox`.
    ///
    /// Entries without a downloaded receipt, or whose receipt fails
    /// verification, are left for a later pass.
    pub(crate) fn accept_entire_nymbox(&self, nymbox: &Ledger) -> Result<NymboxAction, ContextError> {
        let mut items = Vec::new();
        let mut blanks = NumberSet::new();
        let mut already_seen = 0;

        for entry in nymbox.entries() {
            let Some(transaction) = entry.as_full() else {
                debug!(number = entry.number(), "Nymbox entry has no receipt yet");
                continue;
            };
            let verified = transaction
                .header
                .verify_owner(self.nym_id(), self.notary_id())
                .and_then(|()| verify_contract(&*self.signer, self.notary_id(), transaction));
            if let Err(e) = verified {
                warn!(number = transaction.number, error = %e, "Skipping unverifiable nymbox receipt");
                continue;
            }

            let number = transaction.number;
            match &transaction.kind {
                TransactionKind::Message { payload } => {
                    self.observer.nym_message_received(self.notary_id(), payload);
                    items.push(Item::request(ItemKind::AcceptMessage, number));
                }
                TransactionKind::InstrumentNotice { payload } => {
                    self.observer
                        .instrument_notice_received(self.notary_id(), payload);
                    items.push(Item::request(ItemKind::AcceptNotice, number));
                }
                TransactionKind::Notice { payload } => {
                    self.observer.notice_received(self.notary_id(), payload);
                    items.push(Item::request(ItemKind::AcceptNotice, number));
                }
                TransactionKind::SuccessNotice { numbers } => {
                    let confirmed: NumberSet = {
                        let book = self.numbers.lock();
                        numbers
                            .iter()
                            .filter(|n| book.verify_tentative(**n))
                            .copied()
                            .collect()
                    };
                    if confirmed.len() != numbers.len() {
                        warn!(
                            number,
                            offered = ?numbers,
                            confirmed = ?confirmed,
                            "Success notice lists numbers that are not tentative"
                        );
                    }
                    items.push(Item::request(ItemKind::AcceptNotice, number).with_numbers(confirmed));
                }
                TransactionKind::ReplyNotice { request_number, reply } => {
                    if self.verify_acknowledged(*request_number) {
                        debug!(request = request_number, "Reply notice already processed");
                        already_seen += 1;
                        continue;
                    }
                    if let Err(e) = self.process_reply_notice(reply) {
                        warn!(request = request_number, error = %e, "Reply notice could not be processed");
                    }
                    items.push(Item::request(ItemKind::AcceptNotice, number));
                }
                TransactionKind::Blank { numbers } => {
                    let fresh: NumberSet = {
                        let book = self.numbers.lock();
                        numbers
                            .iter()
                            .filter(|n| {
                                !book.verify_issued(**n)
                                    && !book.verify_tentative(**n)
                                    && **n > book.highest()
                            })
                            .copied()
                            .collect()
                    };
                    if fresh.len() != numbers.len() {
                        debug!(number, offered = numbers.len(), fresh = fresh.len(), "Blank carries known numbers");
                    }
                    blanks.extend(fresh.iter().copied());
                    items.push(Item::request(ItemKind::AcceptTransaction, number).with_numbers(fresh));
                }
                TransactionKind::FinalReceipt { opening_number, .. } => {
                    if self.consume_issued(*opening_number) {
                        debug!(opening = opening_number, "Final receipt closed opening number");
                    }
                    self.observer
                        .final_receipt_received(self.notary_id(), *opening_number);
                    items.push(Item::request(ItemKind::AcceptFinalReceipt, number));
                }
                TransactionKind::ProcessNymbox
                | TransactionKind::ProcessInbox { .. }
                | TransactionKind::Transfer { .. }
                | TransactionKind::PendingTransfer { .. }
                | TransactionKind::TransferReceipt { .. }
                | TransactionKind::CronActivation { .. } => {
                    warn!(
                        number,
                        kind = ?transaction.transaction_type(),
                        "Entry does not belong in a nymbox"
                    );
                }
            }
        }

        if items.is_empty() {
            return Ok(if already_seen > 0 {
                NymboxAction::AlreadySeen(already_seen)
            } else {
                NymboxAction::Nothing
            });
        }

        let statement = self.statement(&blanks, &NumberSet::new());
        let acceptance = NymboxAcceptance {
            items: items.clone(),
        };

        let mut transaction = Transaction::new(
            ContractHeader::new(self.nym_id().clone(), self.notary_id().clone(), SignerRole::Nym),
            0,
            TransactionKind::ProcessNymbox,
        );
        transaction.items = items;
        transaction
            .items
            .push(Item::request(ItemKind::TransactionStatement, 0).with_attachment(statement.to_bytes()?));
        sign_contract(&*self.signer, &mut transaction)?;

        debug!(items = acceptance.len(), blanks = blanks.len(), "Accepting nymbox");
        Ok(NymboxAction::Accept(transaction, acceptance))
    }
}
