//! # Reply Processing
//!
//! Every reply, whether it arrives directly or inside a reply notice, goes
//! through [`ServerContext::process_reply`]: validation against the request,
//! signature check, acknowledgement bookkeeping and then the handler for its
//! command.

use crate::application::context::ServerContext;
use crate::domain::{
    decode_payload, invariant_reply_matches, AccountData, ContextError, Disposition, ItemKind,
    ItemStatus, Ledger, LedgerEntry, NotarizeReply, NymRegistration, ProcessNymboxReply,
    Transaction, TransactionKind, TransactionStatement,
};
use crate::ports::{verify_contract, TransactionNumberApi};
use shared_types::{BoxType, Message, MessageType, NumberSet};
use tracing::{debug, info, warn};

impl ServerContext {
    /// Validate `reply` against `request` and apply what it says.
    pub(crate) fn process_reply(&self, request: &Message, reply: &Message) -> Result<(), ContextError> {
        invariant_reply_matches(request, reply, self.nym_id(), self.notary_id())?;
        verify_contract(&*self.signer, self.notary_id(), reply)?;

        {
            let mut state = self.state.lock();
            // A rejection shares its request number with whatever the notary
            // last processed under it, so only successes are acknowledged.
            if reply.success && request.command.requires_request_number() {
                state.acknowledged.insert(reply.request_number);
            }
            for seen in &reply.acknowledged_replies {
                state.acknowledged.remove(seen);
            }
            if let Some(hash) = reply.nymbox_hash {
                state.remote_nymbox_hash = Some(hash);
            }
            if reply.success && state.is_pending(request) {
                for number in state.pending_numbers.iter_mut() {
                    number.set_success(true);
                }
            }
        }

        if !reply.success {
            debug!(
                notary = %self.notary_id(),
                command = request.command.as_str(),
                request = reply.request_number,
                "Notary reported failure"
            );
            return Ok(());
        }

        match reply.command {
            MessageType::PingNotary | MessageType::GetTransactionNumbers => Ok(()),
            MessageType::GetRequestNumber => {
                self.adopt_request_number(reply);
                Ok(())
            }
            MessageType::RegisterNym => self.handle_register_nym(reply),
            MessageType::UnregisterNym => self.reset(),
            MessageType::GetNymbox => self.handle_nymbox(reply),
            MessageType::GetBoxReceipt => self.handle_box_receipt(request, reply),
            MessageType::ProcessNymbox => self.handle_process_nymbox(reply),
            MessageType::ProcessInbox => self.handle_process_inbox(request),
            MessageType::NotarizeTransaction => self.handle_notarize(reply),
            MessageType::GetAccountData => self.handle_account_data(reply),
            MessageType::CheckNym
            | MessageType::SendNymMessage
            | MessageType::RegisterAccount
            | MessageType::UnregisterAccount
            | MessageType::RegisterInstrumentDefinition
            | MessageType::RegisterContract
            | MessageType::GetInstrumentDefinition
            | MessageType::GetMint
            | MessageType::GetMarketList
            | MessageType::GetMarketOffers
            | MessageType::GetMarketRecentTrades
            | MessageType::GetNymMarketOffers
            | MessageType::TriggerClause
            | MessageType::UsageCredits
            | MessageType::QueryInstrumentDefinitions => {
                self.observer.reply_received(reply);
                Ok(())
            }
        }
    }

    /// Process the reply carried by a reply notice.
    pub(crate) fn process_reply_notice(&self, armored: &[u8]) -> Result<(), ContextError> {
        let reply = Message::from_bytes(armored)?;
        let request = reply.original_request()?.ok_or_else(|| {
            ContextError::ProtocolViolation("reply notice without its request".into())
        })?;
        verify_contract(&*self.signer, self.notary_id(), &request)?;
        self.process_reply(&request, &reply)?;

        info!(
            notary = %self.notary_id(),
            command = request.command.as_str(),
            request = reply.request_number,
            "Recovered reply from notice"
        );
        let mut state = self.state.lock();
        if reply.success && state.is_pending(&request) {
            state.recovered_reply = Some(reply);
        }
        Ok(())
    }

    fn adopt_request_number(&self, reply: &Message) {
        if reply.new_request_number > 0 {
            let mut state = self.state.lock();
            debug!(from = state.request, to = reply.new_request_number, "Adopting request number");
            state.request = reply.new_request_number;
        }
    }

    fn handle_register_nym(&self, reply: &Message) -> Result<(), ContextError> {
        self.adopt_request_number(reply);
        let resync = self.state.lock().pending_args.resync;
        if resync {
            let registration: NymRegistration = decode_payload(&reply.payload)?;
            self.resync(&registration.issued);
        }
        Ok(())
    }

    fn handle_nymbox(&self, reply: &Message) -> Result<(), ContextError> {
        let mut nymbox = Ledger::from_bytes(&reply.payload)?;
        if nymbox.box_type != BoxType::Nymbox {
            return Err(ContextError::ProtocolViolation(format!(
                "getNymbox returned a {}",
                nymbox.box_type.as_str()
            )));
        }
        nymbox.header.verify_owner(self.nym_id(), self.notary_id())?;
        verify_contract(&*self.signer, self.notary_id(), &nymbox)?;

        // Keep receipts already downloaded for entries that are still listed.
        if let Some(previous) = self.load_box(BoxType::Nymbox, None)? {
            for entry in previous.entries() {
                if let LedgerEntry::Full(transaction) = entry {
                    if nymbox.get(transaction.number).is_some() {
                        if let Err(e) = nymbox.attach_receipt(transaction.clone()) {
                            debug!(number = transaction.number, error = %e, "Dropping stale receipt");
                        }
                    }
                }
            }
        }

        let hash = nymbox.content_hash()?;
        self.store_box(&mut nymbox, false)?;
        self.set_local_nymbox_hash(hash);
        debug!(
            notary = %self.notary_id(),
            entries = nymbox.len(),
            missing = nymbox.missing_receipts().len(),
            "Nymbox downloaded"
        );
        Ok(())
    }

    fn handle_box_receipt(&self, request: &Message, reply: &Message) -> Result<(), ContextError> {
        let transaction = Transaction::from_bytes(&reply.payload)?;
        transaction.header.verify_owner(self.nym_id(), self.notary_id())?;
        verify_contract(&*self.signer, self.notary_id(), &transaction)?;
        if transaction.number != request.transaction_number {
            return Err(ContextError::ProtocolViolation(format!(
                "asked for receipt {}, got {}",
                request.transaction_number, transaction.number
            )));
        }

        let box_type = request
            .box_type
            .ok_or_else(|| ContextError::ProtocolViolation("getBoxReceipt without a box".into()))?;
        let account = request.account_id.as_ref();
        let mut ledger = self
            .load_box(box_type, account)?
            .ok_or_else(|| ContextError::NotFound(format!("local {}", box_type.as_str())))?;
        ledger.attach_receipt(transaction)?;
        self.store_box(&mut ledger, false)
    }

    fn handle_process_nymbox(&self, reply: &Message) -> Result<(), ContextError> {
        let Some(acceptance) = self.state.lock().nymbox_acceptance.take() else {
            warn!(notary = %self.notary_id(), "processNymbox reply without a pending acceptance");
            return Ok(());
        };
        let answer: ProcessNymboxReply = decode_payload(&reply.payload)?;

        let mut cleared = NumberSet::new();
        for answered in &answer.items {
            if answered.kind == ItemKind::TransactionStatement {
                continue;
            }
            let Some(sent) = acceptance.item(answered.in_reference_to) else {
                warn!(number = answered.in_reference_to, "Notary answered an item that was not sent");
                continue;
            };
            if answered.status == ItemStatus::Rejection {
                warn!(number = sent.in_reference_to, "Notary rejected nymbox item");
                continue;
            }
            cleared.insert(sent.in_reference_to);

            match sent.kind {
                ItemKind::AcceptTransaction => {
                    for number in &sent.numbers {
                        if !self.add_tentative(*number) {
                            debug!(number, "Blank number not added as tentative");
                        }
                    }
                }
                ItemKind::AcceptNotice if !sent.numbers.is_empty() => {
                    let statement = TransactionStatement::new(
                        self.notary_id().clone(),
                        sent.numbers.clone(),
                        sent.numbers.clone(),
                    );
                    self.accept_issued_statement(&statement);
                }
                _ => {}
            }
        }

        if let Some(statement) = answer.statement {
            let tentative = self.tentative();
            if let Err(e) = self.verify_statement(&statement, &NumberSet::new(), &tentative) {
                warn!(notary = %self.notary_id(), error = %e, "Notary statement disagrees, resyncing");
                self.resync(statement.issued());
            }
        }

        if let Some(mut nymbox) = self.load_box(BoxType::Nymbox, None)? {
            for number in &cleared {
                nymbox.remove(*number);
            }
            let hash = nymbox.content_hash()?;
            self.store_box(&mut nymbox, true)?;
            self.set_local_nymbox_hash(hash);
        }
        info!(
            notary = %self.notary_id(),
            cleared = cleared.len(),
            available = self.available_count(),
            "Nymbox processed"
        );
        Ok(())
    }

    fn handle_process_inbox(&self, request: &Message) -> Result<(), ContextError> {
        let transaction = Transaction::from_bytes(&request.payload)?;
        let TransactionKind::ProcessInbox { accepted, rejected } = &transaction.kind else {
            return Err(ContextError::ProtocolViolation(
                "processInbox request without a processInbox transaction".into(),
            ));
        };

        let held = self.state.lock().inbox.take();
        let mut inbox = match held {
            Some(inbox) => inbox,
            None => match self.load_box(BoxType::Inbox, request.account_id.as_ref())? {
                Some(inbox) => inbox,
                None => return Ok(()),
            },
        };
        for number in accepted.iter().chain(rejected.iter()) {
            inbox.remove(*number);
        }
        let stored = self.store_box(&mut inbox, true);

        let mut state = self.state.lock();
        if state.box_account.is_some() && state.box_account == inbox.header.account_id {
            state.inbox = Some(inbox);
        }
        stored
    }

    fn handle_notarize(&self, reply: &Message) -> Result<(), ContextError> {
        let answer: NotarizeReply = decode_payload(&reply.payload)?;
        for outcome in answer.outcomes {
            match outcome.disposition {
                Disposition::Final | Disposition::Rejected => {
                    if !self.consume_issued(outcome.number) {
                        debug!(number = outcome.number, "Closed number was not issued locally");
                    }
                }
                Disposition::Pending { receipt } => {
                    let Some(receipt) = receipt else { continue };
                    let updated = self.state.lock().outbox.as_mut().map(|outbox| {
                        outbox.add_transaction(receipt);
                        outbox.clone()
                    });
                    if let Some(mut outbox) = updated {
                        self.store_box(&mut outbox, true)?;
                        self.state.lock().outbox = Some(outbox);
                    }
                }
                Disposition::CronRejected { closing_numbers } => {
                    self.consume_issued(outcome.number);
                    for number in &closing_numbers {
                        if !self.recover_available(*number) {
                            debug!(number, "Closing number not recovered");
                        }
                    }
                    info!(
                        opening = outcome.number,
                        recovered = closing_numbers.len(),
                        "Cron activation refused"
                    );
                }
            }
        }
        Ok(())
    }

    fn handle_account_data(&self, reply: &Message) -> Result<(), ContextError> {
        let data: AccountData = decode_payload(&reply.payload)?;
        let account = reply
            .account_id
            .clone()
            .ok_or_else(|| ContextError::ProtocolViolation("getAccountData without an account".into()))?;

        let mut inbox = data.inbox;
        let mut outbox = data.outbox;
        for (ledger, expected) in [(&inbox, BoxType::Inbox), (&outbox, BoxType::Outbox)] {
            if ledger.box_type != expected || ledger.header.account_id.as_ref() != Some(&account) {
                return Err(ContextError::ProtocolViolation(format!(
                    "account data carries the wrong {}",
                    expected.as_str()
                )));
            }
            ledger.header.verify_owner(self.nym_id(), self.notary_id())?;
            verify_contract(&*self.signer, self.notary_id(), ledger)?;
        }
        self.store_box(&mut inbox, false)?;
        self.store_box(&mut outbox, false)?;

        {
            let mut state = self.state.lock();
            if state.box_account.as_ref() == Some(&account) {
                state.inbox = Some(inbox);
                state.outbox = Some(outbox);
            }
        }
        self.observer.account_data_received(&account, &data.account);
        Ok(())
    }
}
