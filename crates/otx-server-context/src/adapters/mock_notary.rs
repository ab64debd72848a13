//! # Scripted In-Process Notary
//!
//! Implements [`ServerConnection`] by running a small notary in memory.
//! It keeps per-nym request counters, issued numbers and nymboxes, signs its
//! replies, and can be scripted to misbehave on upcoming sends.

use crate::domain::{
    encode_payload, AccountData, ContextError, ContractHeader, Disposition, ItemKind,
    Ledger, NetworkReply, NotarizeReply, NymRegistration, ProcessNymboxReply,
    SendResult, Signable, SignerRole, Transaction, TransactionKind, TransactionOutcome,
    TransactionStatement,
};
use crate::ports::ServerConnection;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_crypto::{Ed25519KeyPair, Ed25519PublicKey};
use shared_types::{
    BoxType, Hash, Message, MessageType, NotaryId, NumberSet, NymId, RequestNumber,
    TransactionNumber,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Misbehaviour applied to the next send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFault {
    /// Report a timeout without processing.
    Timeout,
    /// Report a transport error without processing.
    TransportError,
    /// Report an unusable reply without processing.
    InvalidReply,
    /// Process, then sign the reply with the wrong key.
    BadSignature,
    /// Process, then lose the reply.
    DropReply,
    /// Advance the nym's request counter before processing.
    RequestDrift,
    /// Reject without processing.
    Reject,
    /// Wait before processing.
    Stall(Duration),
}

struct NymAccount {
    public_key: Ed25519PublicKey,
    registered: bool,
    request: RequestNumber,
    issued: NumberSet,
    nymbox: BTreeMap<TransactionNumber, Transaction>,
}

struct NotaryState {
    nyms: HashMap<NymId, NymAccount>,
    next_number: TransactionNumber,
    faults: VecDeque<ScriptedFault>,
    received: Vec<Message>,
    blank_size: i64,
    reject_cron: bool,
    lagging_acks: bool,
}

/// In-memory notary.
pub struct MockNotary {
    notary_id: NotaryId,
    keypair: Ed25519KeyPair,
    impostor: Ed25519KeyPair,
    state: Mutex<NotaryState>,
}

impl MockNotary {
    /// Notary `notary_id` signing with a key derived from `seed`.
    pub fn new(notary_id: NotaryId, seed: [u8; 32]) -> Self {
        let mut impostor_seed = seed;
        impostor_seed[0] ^= 0xff;
        Self {
            notary_id,
            keypair: Ed25519KeyPair::from_seed(seed),
            impostor: Ed25519KeyPair::from_seed(impostor_seed),
            state: Mutex::new(NotaryState {
                nyms: HashMap::new(),
                next_number: 100,
                faults: VecDeque::new(),
                received: Vec::new(),
                blank_size: 5,
                reject_cron: false,
                lagging_acks: false,
            }),
        }
    }

    /// The notary's identifier.
    pub fn notary_id(&self) -> &NotaryId {
        &self.notary_id
    }

    /// The notary's signing key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Let `nym` talk to this notary.
    pub fn add_nym(&self, nym: NymId, public_key: Ed25519PublicKey) {
        self.state.lock().nyms.insert(
            nym,
            NymAccount {
                public_key,
                registered: false,
                request: 0,
                issued: NumberSet::new(),
                nymbox: BTreeMap::new(),
            },
        );
    }

    /// Queue a fault for an upcoming send.
    pub fn push_fault(&self, fault: ScriptedFault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Numbers handed out per blank.
    pub fn set_blank_size(&self, size: i64) {
        self.state.lock().blank_size = size;
    }

    /// Refuse every cron activation.
    pub fn set_reject_cron(&self, reject: bool) {
        self.state.lock().reject_cron = reject;
    }

    /// Ignore acknowledged replies: keep their reply notices in the nymbox
    /// and report none of them as seen.
    pub fn set_lagging_acknowledgements(&self, lagging: bool) {
        self.state.lock().lagging_acks = lagging;
    }

    /// Every request received so far.
    pub fn received(&self) -> Vec<Message> {
        self.state.lock().received.clone()
    }

    /// Commands received so far, in order.
    pub fn received_commands(&self) -> Vec<MessageType> {
        self.state.lock().received.iter().map(|m| m.command).collect()
    }

    /// Numbers the notary considers issued to `nym`.
    pub fn issued_to(&self, nym: &NymId) -> NumberSet {
        self.state
            .lock()
            .nyms
            .get(nym)
            .map(|a| a.issued.clone())
            .unwrap_or_default()
    }

    /// Request number the notary expects next from `nym`.
    pub fn expected_request(&self, nym: &NymId) -> RequestNumber {
        self.state.lock().nyms.get(nym).map_or(0, |a| a.request)
    }

    /// Entries waiting in `nym`'s nymbox, by type.
    pub fn nymbox_types(&self, nym: &NymId) -> Vec<crate::domain::TransactionType> {
        self.state
            .lock()
            .nyms
            .get(nym)
            .map(|a| a.nymbox.values().map(Transaction::transaction_type).collect())
            .unwrap_or_default()
    }

    /// Issue numbers directly, bypassing the blank flow.
    pub fn issue_directly(&self, nym: &NymId, numbers: &NumberSet) {
        if let Some(account) = self.state.lock().nyms.get_mut(nym) {
            account.issued.extend(numbers.iter().copied());
        }
    }

    /// Drop a blank offering fresh numbers into `nym`'s nymbox.
    pub fn deliver_blank(&self, nym: &NymId) -> Result<NumberSet, ContextError> {
        let mut state = self.state.lock();
        let first = state.next_number;
        let numbers: NumberSet = (first..first + state.blank_size).collect();
        state.next_number += state.blank_size;
        self.deliver(&mut state, nym, TransactionKind::Blank { numbers: numbers.clone() })?;
        Ok(numbers)
    }

    /// Drop a nym message into `nym`'s nymbox.
    pub fn deliver_message(&self, nym: &NymId, payload: Vec<u8>) -> Result<TransactionNumber, ContextError> {
        let mut state = self.state.lock();
        self.deliver(&mut state, nym, TransactionKind::Message { payload })
    }

    /// Drop a final receipt closing `opening_number` into `nym`'s nymbox.
    pub fn deliver_final_receipt(
        &self,
        nym: &NymId,
        opening_number: TransactionNumber,
    ) -> Result<TransactionNumber, ContextError> {
        let mut state = self.state.lock();
        if let Some(account) = state.nyms.get_mut(nym) {
            account.issued.remove(&opening_number);
        }
        self.deliver(
            &mut state,
            nym,
            TransactionKind::FinalReceipt {
                opening_number,
                closing_numbers: NumberSet::new(),
            },
        )
    }

    fn deliver(
        &self,
        state: &mut NotaryState,
        nym: &NymId,
        kind: TransactionKind,
    ) -> Result<TransactionNumber, ContextError> {
        let number = state.next_number;
        state.next_number += 1;
        let account = state
            .nyms
            .get_mut(nym)
            .ok_or_else(|| ContextError::NotFound(format!("nym {nym}")))?;
        let mut transaction = Transaction::new(
            ContractHeader::new(nym.clone(), self.notary_id.clone(), SignerRole::Notary),
            number,
            kind,
        );
        self.sign(&mut transaction)?;
        account.nymbox.insert(number, transaction);
        Ok(number)
    }

    fn sign<S: Signable>(&self, contract: &mut S) -> Result<(), ContextError> {
        let bytes = contract.signing_bytes()?;
        contract.set_signature(self.keypair.sign(&bytes).to_vec());
        Ok(())
    }

    fn nymbox(&self, nym: &NymId, account: &NymAccount) -> Ledger {
        let mut ledger = Ledger::new(
            BoxType::Nymbox,
            ContractHeader::new(nym.clone(), self.notary_id.clone(), SignerRole::Notary),
        );
        for transaction in account.nymbox.values() {
            ledger.add_transaction(transaction.clone());
        }
        ledger
    }

    fn nymbox_hash(&self, nym: &NymId, account: &NymAccount) -> Option<Hash> {
        self.nymbox(nym, account).content_hash().ok()
    }

    fn process(&self, request: &Message, drift: bool) -> Result<Message, ContextError> {
        let mut state = self.state.lock();
        state.received.push(request.clone());
        let state = &mut *state;
        let lagging_acks = state.lagging_acks;

        let Some(account) = state.nyms.get_mut(&request.nym_id) else {
            return self.finish(Message::reply_to(request, false));
        };
        if drift {
            account.request += 1;
        }

        let signed_by_nym = Signable::signing_bytes(request)
            .and_then(|bytes| Ok(account.public_key.verify_slice(&bytes, &request.signature)?));
        if signed_by_nym.is_err() || request.notary_id != self.notary_id {
            return self.finish(Message::reply_to(request, false));
        }

        let mut reply = Message::reply_to(request, true);
        if !lagging_acks {
            account.nymbox.retain(|_, tx| match tx.kind {
                TransactionKind::ReplyNotice { request_number, .. } => {
                    !request.acknowledged_replies.contains(&request_number)
                }
                _ => true,
            });
            reply.acknowledged_replies = request.acknowledged_replies.clone();
        }

        if request.command.requires_request_number() {
            if !account.registered || request.request_number != account.request {
                debug!(
                    expected = account.request,
                    got = request.request_number,
                    "Mock notary rejecting request number"
                );
                reply.success = false;
                reply.nymbox_hash = self.nymbox_hash(&request.nym_id, account);
                return self.finish(reply);
            }
            account.request += 1;
        }

        match request.command {
            MessageType::PingNotary => {}
            MessageType::RegisterNym => {
                if !account.registered {
                    account.registered = true;
                    account.request = 1;
                }
                reply.new_request_number = account.request;
                reply.payload = encode_payload(&NymRegistration {
                    issued: account.issued.clone(),
                })?;
            }
            MessageType::UnregisterNym => {
                account.registered = false;
                account.issued.clear();
                account.nymbox.clear();
            }
            MessageType::GetRequestNumber => {
                reply.success = account.registered;
                reply.new_request_number = account.request;
            }
            MessageType::GetTransactionNumbers => {
                let first = state.next_number;
                let numbers: NumberSet = (first..first + state.blank_size).collect();
                state.next_number += state.blank_size + 1;
                let mut blank = Transaction::new(
                    ContractHeader::new(request.nym_id.clone(), self.notary_id.clone(), SignerRole::Notary),
                    first + state.blank_size,
                    TransactionKind::Blank { numbers },
                );
                self.sign(&mut blank)?;
                account.nymbox.insert(blank.number, blank);
            }
            MessageType::GetNymbox => {
                let mut ledger = self.nymbox(&request.nym_id, account).abbreviated()?;
                self.sign(&mut ledger)?;
                reply.payload = ledger.to_bytes()?;
            }
            MessageType::GetBoxReceipt => match account.nymbox.get(&request.transaction_number) {
                Some(transaction) if request.box_type == Some(BoxType::Nymbox) => {
                    reply.payload = transaction.to_bytes()?;
                }
                _ => reply.success = false,
            },
            MessageType::ProcessNymbox => {
                let transaction = Transaction::from_bytes(&request.payload)?;
                let mut answered = Vec::new();
                let mut notices = Vec::new();
                for item in &transaction.items {
                    if item.kind == ItemKind::TransactionStatement {
                        answered.push(item.answered(true));
                        continue;
                    }
                    match account.nymbox.remove(&item.in_reference_to) {
                        Some(Transaction {
                            kind: TransactionKind::Blank { numbers },
                            ..
                        }) => {
                            let accepted: NumberSet =
                                item.numbers.intersection(&numbers).copied().collect();
                            account.issued.extend(accepted.iter().copied());
                            notices.push(TransactionKind::SuccessNotice { numbers: accepted });
                            answered.push(item.answered(true));
                        }
                        Some(_) => answered.push(item.answered(true)),
                        None => answered.push(item.answered(false)),
                    }
                }
                for kind in notices {
                    let number = state.next_number;
                    state.next_number += 1;
                    let mut notice = Transaction::new(
                        ContractHeader::new(request.nym_id.clone(), self.notary_id.clone(), SignerRole::Notary),
                        number,
                        kind,
                    );
                    self.sign(&mut notice)?;
                    account.nymbox.insert(number, notice);
                }
                reply.payload = encode_payload(&ProcessNymboxReply {
                    items: answered,
                    statement: Some(TransactionStatement::new(
                        self.notary_id.clone(),
                        account.issued.clone(),
                        NumberSet::new(),
                    )),
                })?;
            }
            MessageType::NotarizeTransaction => {
                let transaction = Transaction::from_bytes(&request.payload)?;
                if !account.issued.contains(&transaction.number) {
                    reply.success = false;
                } else {
                    let disposition = match &transaction.kind {
                        TransactionKind::CronActivation { closing_numbers } if state.reject_cron => {
                            account.issued.remove(&transaction.number);
                            Disposition::CronRejected {
                                closing_numbers: closing_numbers.clone(),
                            }
                        }
                        TransactionKind::CronActivation { .. } => Disposition::Pending { receipt: None },
                        _ => {
                            account.issued.remove(&transaction.number);
                            Disposition::Final
                        }
                    };
                    reply.payload = encode_payload(&NotarizeReply {
                        outcomes: vec![TransactionOutcome {
                            number: transaction.number,
                            disposition,
                        }],
                    })?;
                }
            }
            MessageType::GetAccountData => {
                let header = ContractHeader::new(request.nym_id.clone(), self.notary_id.clone(), SignerRole::Notary);
                let header = match &request.account_id {
                    Some(id) => header.with_account(id.clone()),
                    None => header,
                };
                let mut inbox = Ledger::new(BoxType::Inbox, header.clone());
                let mut outbox = Ledger::new(BoxType::Outbox, header);
                self.sign(&mut inbox)?;
                self.sign(&mut outbox)?;
                reply.payload = encode_payload(&AccountData {
                    account: b"account".to_vec(),
                    inbox,
                    outbox,
                })?;
            }
            _ => {}
        }

        if reply.success && Self::drops_reply_notice(request.command) {
            let mut copy = reply.clone();
            self.sign(&mut copy)?;
            let number = state.next_number;
            state.next_number += 1;
            let mut notice = Transaction::new(
                ContractHeader::new(request.nym_id.clone(), self.notary_id.clone(), SignerRole::Notary),
                number,
                TransactionKind::ReplyNotice {
                    request_number: request.request_number,
                    reply: copy.to_bytes()?,
                },
            );
            self.sign(&mut notice)?;
            account.nymbox.insert(number, notice);
        }

        reply.nymbox_hash = self.nymbox_hash(&request.nym_id, account);
        self.finish(reply)
    }

    fn drops_reply_notice(command: MessageType) -> bool {
        matches!(
            command,
            MessageType::NotarizeTransaction | MessageType::ProcessInbox | MessageType::SendNymMessage
        )
    }

    fn finish(&self, mut reply: Message) -> Result<Message, ContextError> {
        self.sign(&mut reply)?;
        Ok(reply)
    }

    fn answer(&self, request: &Message, drift: bool) -> NetworkReply {
        match self.process(request, drift) {
            Ok(reply) => NetworkReply::valid(reply),
            Err(e) => {
                debug!(error = %e, "Mock notary could not answer");
                NetworkReply::failed(SendResult::InvalidReply)
            }
        }
    }
}

#[async_trait]
impl ServerConnection for MockNotary {
    async fn send(&self, message: &Message, _push: bool) -> NetworkReply {
        let fault = self.state.lock().faults.pop_front();
        match fault {
            None => self.answer(message, false),
            Some(ScriptedFault::Timeout) => NetworkReply::failed(SendResult::Timeout),
            Some(ScriptedFault::TransportError) => NetworkReply::failed(SendResult::Error),
            Some(ScriptedFault::InvalidReply) => NetworkReply::failed(SendResult::InvalidReply),
            Some(ScriptedFault::RequestDrift) => self.answer(message, true),
            Some(ScriptedFault::Reject) => {
                let mut reply = Message::reply_to(message, false);
                {
                    let mut state = self.state.lock();
                    state.received.push(message.clone());
                    reply.nymbox_hash = state
                        .nyms
                        .get(&message.nym_id)
                        .and_then(|account| self.nymbox_hash(&message.nym_id, account));
                }
                match self.finish(reply) {
                    Ok(reply) => NetworkReply::valid(reply),
                    Err(_) => NetworkReply::failed(SendResult::InvalidReply),
                }
            }
            Some(ScriptedFault::DropReply) => {
                let _ = self.answer(message, false);
                NetworkReply::failed(SendResult::Timeout)
            }
            Some(ScriptedFault::BadSignature) => {
                let mut network = self.answer(message, false);
                if let Some(reply) = network.reply.as_mut() {
                    if let Ok(bytes) = Signable::signing_bytes(reply) {
                        reply.signature = self.impostor.sign(&bytes).to_vec();
                    }
                }
                network
            }
            Some(ScriptedFault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                self.answer(message, false)
            }
        }
    }

    fn endpoint(&self) -> String {
        format!("mock://{}", self.notary_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Item;

    fn signed(nym: &Ed25519KeyPair, mut message: Message) -> Message {
        let bytes = Signable::signing_bytes(&message).unwrap();
        message.signature = nym.sign(&bytes).to_vec();
        message
    }

    fn setup() -> (MockNotary, Ed25519KeyPair, NymId) {
        let notary = MockNotary::new(NotaryId::new("notary"), [9; 32]);
        let key = Ed25519KeyPair::from_seed([1; 32]);
        let nym = NymId::new("nym");
        notary.add_nym(nym.clone(), key.public_key());
        (notary, key, nym)
    }

    #[tokio::test]
    async fn test_register_then_request_numbers() {
        let (notary, key, nym) = setup();
        let register = signed(
            &key,
            Message::request(MessageType::RegisterNym, nym.clone(), notary.notary_id().clone(), 1),
        );
        let reply = notary.send(&register, true).await.reply.unwrap();
        assert!(reply.success);
        assert_eq!(reply.new_request_number, 1);

        let stale = signed(
            &key,
            Message::request(MessageType::GetNymbox, nym.clone(), notary.notary_id().clone(), 7),
        );
        assert!(!notary.send(&stale, true).await.reply.unwrap().success);

        let fresh = signed(
            &key,
            Message::request(MessageType::GetNymbox, nym.clone(), notary.notary_id().clone(), 1),
        );
        assert!(notary.send(&fresh, true).await.reply.unwrap().success);
        assert_eq!(notary.expected_request(&nym), 2);
    }

    #[tokio::test]
    async fn test_unsigned_request_rejected() {
        let (notary, _key, nym) = setup();
        let register = Message::request(MessageType::RegisterNym, nym, notary.notary_id().clone(), 1);
        assert!(!notary.send(&register, true).await.reply.unwrap().success);
    }

    #[tokio::test]
    async fn test_scripted_timeout_skips_processing() {
        let (notary, key, nym) = setup();
        notary.push_fault(ScriptedFault::Timeout);
        let ping = signed(
            &key,
            Message::request(MessageType::PingNotary, nym, notary.notary_id().clone(), 1),
        );
        let network = notary.send(&ping, true).await;
        assert_eq!(network.result, SendResult::Timeout);
        assert!(notary.received().is_empty());
    }

    #[test]
    fn test_blank_lands_in_nymbox() {
        let (notary, _key, nym) = setup();
        let numbers = notary.deliver_blank(&nym).unwrap();
        assert_eq!(numbers.len(), 5);
        assert_eq!(
            notary.nymbox_types(&nym),
            vec![crate::domain::TransactionType::Blank]
        );
    }

    #[test]
    fn test_accepted_item_answered() {
        let item = Item::request(ItemKind::AcceptNotice, 3);
        assert_eq!(item.answered(true).status, crate::domain::ItemStatus::Acknowledgement);
    }
}
