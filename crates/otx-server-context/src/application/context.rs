//! # Server Context
//!
//! Per (nym, notary) state: the number book, request counter, acknowledged
//! replies, nymbox hashes, admin session and the delivery slot.
//!
//! ## Locking
//!
//! | Lock | Guards | Order |
//! |------|--------|-------|
//! | `message_lock` (async) | one exchange with the connection at a time | 1 |
//! | `state` | everything except the number book | 2 |
//! | `numbers` | the number book | 3 |
//!
//! A [`ManagedNumber`] locks `numbers` when dropped, so it may be dropped
//! while `state` is held but never while `numbers` is.

use crate::application::nymbox::NymboxAcceptance;
use crate::application::repository::{BoxLocation, LedgerRepository};
use crate::config::ContextConfig;
use crate::domain::{
    ContextError, ContextRecord, ContractHeader, DeliveryResult, DeliveryState, LastReplyStatus,
    Ledger, ManagedNumber, PendingArgs, ResyncReport, SharedNumbers, SignerRole,
    TransactionNumbers, TransactionStatement,
};
use crate::ports::{
    sign_contract, verify_contract, ContractSigner, KeyValueStore, NoopObserver, ReplyObserver,
    ServerConnection, TransactionNumberApi,
};
use otx_telemetry::AVAILABLE_NUMBERS;
use parking_lot::Mutex;
use shared_types::{
    AccountId, BoxType, Hash, Message, MessageType, NotaryId, NumberSet, NymId, RequestNumber,
    TransactionNumber,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Process-wide shutdown flag observed after every state-machine tick.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every context sharing this signal to stop.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once triggered.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators injected into a context.
#[derive(Clone)]
pub struct ContextDependencies {
    pub connection: Arc<dyn ServerConnection>,
    pub signer: Arc<dyn ContractSigner>,
    pub store: Arc<dyn KeyValueStore>,
    pub observer: Arc<dyn ReplyObserver>,
    pub shutdown: ShutdownSignal,
}

impl ContextDependencies {
    /// Dependencies with a no-op observer and a private shutdown signal.
    pub fn new(
        connection: Arc<dyn ServerConnection>,
        signer: Arc<dyn ContractSigner>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            connection,
            signer,
            store,
            observer: Arc::new(NoopObserver),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Replace the observer.
    pub fn with_observer(mut self, observer: Arc<dyn ReplyObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Share a shutdown signal.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Mutable state behind the context lock.
#[derive(Default)]
pub(crate) struct ContextState {
    pub(crate) request: RequestNumber,
    pub(crate) acknowledged: NumberSet,
    pub(crate) local_nymbox_hash: Option<Hash>,
    pub(crate) remote_nymbox_hash: Option<Hash>,
    pub(crate) admin_password: String,
    pub(crate) admin_attempted: bool,
    pub(crate) admin_success: bool,
    pub(crate) revision: u64,
    pub(crate) delivery: DeliveryState,
    pub(crate) last_status: LastReplyStatus,
    pub(crate) pending_message: Option<Message>,
    pub(crate) pending_args: PendingArgs,
    pub(crate) pending_numbers: Vec<ManagedNumber>,
    pub(crate) pending_result: Option<oneshot::Sender<DeliveryResult>>,
    pub(crate) failure_counter: u32,
    pub(crate) nymbox_rounds: u32,
    /// The pending message was rejected once; resend it after the nymbox sync.
    pub(crate) resend_after_nymbox: bool,
    /// The next send of the pending message needs a fresh request number.
    pub(crate) restamp_pending: bool,
    /// Reply to the pending message recovered from a reply notice.
    pub(crate) recovered_reply: Option<Message>,
    /// Latest reply worth resolving a nymbox-only delivery with.
    pub(crate) last_reply: Option<Message>,
    pub(crate) nymbox_acceptance: Option<NymboxAcceptance>,
    pub(crate) box_account: Option<AccountId>,
    pub(crate) inbox: Option<Ledger>,
    pub(crate) outbox: Option<Ledger>,
}

impl ContextState {
    /// True if `request` carries the same command and content as the
    /// pending message.
    pub(crate) fn is_pending(&self, request: &Message) -> bool {
        self.pending_message
            .as_ref()
            .is_some_and(|p| p.command == request.command && p.payload == request.payload)
    }
}

/// Client-side consensus state with one notary.
pub struct ServerContext {
    nym_id: NymId,
    notary_id: NotaryId,
    pub(crate) config: ContextConfig,
    pub(crate) state: Mutex<ContextState>,
    pub(crate) numbers: SharedNumbers,
    pub(crate) message_lock: tokio::sync::Mutex<()>,
    pub(crate) driver_active: AtomicBool,
    pub(crate) connection: Arc<dyn ServerConnection>,
    pub(crate) signer: Arc<dyn ContractSigner>,
    pub(crate) repository: LedgerRepository,
    pub(crate) observer: Arc<dyn ReplyObserver>,
    pub(crate) shutdown: ShutdownSignal,
}

impl ServerContext {
    /// Fresh context for first contact with `notary_id`.
    pub fn new(notary_id: NotaryId, deps: ContextDependencies, config: ContextConfig) -> Self {
        Self {
            nym_id: deps.signer.nym_id().clone(),
            notary_id,
            config,
            state: Mutex::new(ContextState::default()),
            numbers: Arc::new(Mutex::new(TransactionNumbers::new())),
            message_lock: tokio::sync::Mutex::new(()),
            driver_active: AtomicBool::new(false),
            connection: deps.connection,
            signer: deps.signer,
            repository: LedgerRepository::new(deps.store),
            observer: deps.observer,
            shutdown: deps.shutdown,
        }
    }

    /// Restore the stored context, or create a fresh one if none is stored.
    ///
    /// A context stored mid-delivery comes back in that state; call
    /// `resume_delivery` or `abandon_delivery`.
    pub fn load(
        notary_id: NotaryId,
        deps: ContextDependencies,
        config: ContextConfig,
    ) -> Result<Self, ContextError> {
        let context = Self::new(notary_id, deps, config);
        let Some(record) = context
            .repository
            .load_context(&context.nym_id, &context.notary_id)?
        else {
            info!(notary = %context.notary_id, "Creating notary context");
            return Ok(context);
        };

        if record.nym_id != context.nym_id {
            return Err(ContextError::WrongNym {
                expected: context.nym_id.clone(),
                actual: record.nym_id,
            });
        }

        let mut book = TransactionNumbers::from_parts(
            record.highest,
            record.issued,
            record.available,
            record.tentative,
        );
        for number in &record.pending_numbers {
            book.consume_available(*number);
        }
        crate::domain::invariant_number_book(&book)?;
        *context.numbers.lock() = book;

        {
            let mut state = context.state.lock();
            state.request = record.request;
            state.acknowledged = record.acknowledged;
            state.local_nymbox_hash = record.local_nymbox_hash;
            state.remote_nymbox_hash = record.remote_nymbox_hash;
            state.admin_password = record.admin_password;
            state.admin_attempted = record.admin_attempted;
            state.admin_success = record.admin_success;
            state.revision = record.revision;
            state.delivery = record.state;
            state.last_status = record.last_status;
            state.pending_message = record.pending_message;
            state.pending_args = record.pending_args;
            state.pending_numbers = record
                .pending_numbers
                .iter()
                .map(|n| ManagedNumber::new(*n, &context.numbers))
                .collect();
        }

        info!(
            notary = %context.notary_id,
            state = %record.state,
            "Restored notary context"
        );
        context.refresh_gauge();
        Ok(context)
    }

    /// The local nym.
    pub fn nym_id(&self) -> &NymId {
        &self.nym_id
    }

    /// The notary.
    pub fn notary_id(&self) -> &NotaryId {
        &self.notary_id
    }

    /// Active configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub(crate) fn record(&self, state: &ContextState) -> ContextRecord {
        let book = self.numbers.lock();
        ContextRecord {
            nym_id: self.nym_id.clone(),
            notary_id: self.notary_id.clone(),
            highest: book.highest(),
            issued: book.issued().clone(),
            available: book.available().clone(),
            tentative: book.tentative().clone(),
            request: state.request,
            acknowledged: state.acknowledged.clone(),
            local_nymbox_hash: state.local_nymbox_hash,
            remote_nymbox_hash: state.remote_nymbox_hash,
            admin_password: state.admin_password.clone(),
            admin_attempted: state.admin_attempted,
            admin_success: state.admin_success,
            revision: state.revision,
            state: state.delivery,
            last_status: state.last_status,
            pending_message: state.pending_message.clone(),
            pending_args: state.pending_args.clone(),
            pending_numbers: state.pending_numbers.iter().map(ManagedNumber::value).collect(),
        }
    }

    /// Persist the context.
    pub fn save(&self) -> Result<(), ContextError> {
        let record = {
            let state = self.state.lock();
            self.record(&state)
        };
        self.repository.save_context(&record)
    }

    /// Save, logging instead of failing.
    pub(crate) fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(notary = %self.notary_id, error = %e, "Failed to save context");
        }
    }

    /// Forget everything learned from the notary (the nym unregistered).
    pub fn reset(&self) -> Result<(), ContextError> {
        {
            let mut state = self.state.lock();
            *self.numbers.lock() = TransactionNumbers::new();
            state.request = 0;
            state.acknowledged.clear();
            state.local_nymbox_hash = None;
            state.remote_nymbox_hash = None;
            state.admin_password.clear();
            state.admin_attempted = false;
            state.admin_success = false;
        }
        self.repository
            .delete_ledger(&self.location(BoxType::Nymbox, None))?;
        info!(notary = %self.notary_id, "Context reset");
        self.refresh_gauge();
        self.save()
    }

    /// Trigger the shutdown signal shared with this context.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub(crate) fn refresh_gauge(&self) {
        AVAILABLE_NUMBERS.set(self.numbers.lock().available_count() as i64);
    }

    // --- request numbers -------------------------------------------------

    /// Next request number to use.
    pub fn request(&self) -> RequestNumber {
        self.state.lock().request
    }

    /// Advance the request counter and return the new value.
    pub fn increment_request(&self) -> RequestNumber {
        let mut state = self.state.lock();
        state.request += 1;
        state.request
    }

    /// Overwrite the request counter.
    pub fn set_request(&self, request: RequestNumber) {
        self.state.lock().request = request;
    }

    // --- acknowledgements ------------------------------------------------

    /// Replies processed but not yet confirmed seen by the notary.
    pub fn acknowledged(&self) -> NumberSet {
        self.state.lock().acknowledged.clone()
    }

    pub fn add_acknowledged(&self, request: RequestNumber) -> bool {
        self.state.lock().acknowledged.insert(request)
    }

    /// Drop numbers the notary reports as seen.
    pub fn remove_acknowledged(&self, requests: &NumberSet) {
        let mut state = self.state.lock();
        for request in requests {
            state.acknowledged.remove(request);
        }
    }

    pub fn verify_acknowledged(&self, request: RequestNumber) -> bool {
        self.state.lock().acknowledged.contains(&request)
    }

    // --- nymbox hashes ---------------------------------------------------

    pub fn local_nymbox_hash(&self) -> Option<Hash> {
        self.state.lock().local_nymbox_hash
    }

    pub fn set_local_nymbox_hash(&self, hash: Hash) {
        self.state.lock().local_nymbox_hash = Some(hash);
    }

    pub fn remote_nymbox_hash(&self) -> Option<Hash> {
        self.state.lock().remote_nymbox_hash
    }

    pub fn set_remote_nymbox_hash(&self, hash: Hash) {
        self.state.lock().remote_nymbox_hash = Some(hash);
    }

    /// True when both hashes are known and equal.
    pub fn nymbox_hash_match(&self) -> bool {
        let state = self.state.lock();
        state.local_nymbox_hash.is_some() && state.local_nymbox_hash == state.remote_nymbox_hash
    }

    // --- admin session ---------------------------------------------------

    pub fn admin_password(&self) -> String {
        self.state.lock().admin_password.clone()
    }

    pub fn set_admin_password(&self, password: impl Into<String>) {
        self.state.lock().admin_password = password.into();
    }

    pub fn admin_attempted(&self) -> bool {
        self.state.lock().admin_attempted
    }

    pub fn set_admin_attempted(&self) {
        self.state.lock().admin_attempted = true;
    }

    pub fn admin_success(&self) -> bool {
        self.state.lock().admin_success
    }

    pub fn set_admin_success(&self) {
        let mut state = self.state.lock();
        state.admin_attempted = true;
        state.admin_success = true;
    }

    // --- revision --------------------------------------------------------

    /// Revision of the nym this context was last updated against.
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    pub fn set_revision(&self, revision: u64) {
        self.state.lock().revision = revision;
    }

    /// True if the nym has moved past the recorded revision.
    pub fn stale_nym(&self, current_revision: u64) -> bool {
        self.state.lock().revision < current_revision
    }

    // --- delivery slot ---------------------------------------------------

    /// Current delivery state.
    pub fn delivery_state(&self) -> DeliveryState {
        self.state.lock().delivery
    }

    /// Status of the most recent exchange.
    pub fn last_status(&self) -> LastReplyStatus {
        self.state.lock().last_status
    }

    /// Copy of the queued message, if any.
    pub fn pending_message(&self) -> Option<Message> {
        self.state.lock().pending_message.clone()
    }

    /// Failures counted against the current delivery.
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_counter
    }

    // --- transaction numbers ---------------------------------------------

    pub fn highest(&self) -> TransactionNumber {
        self.numbers.lock().highest()
    }

    /// Move the high-water mark forward only.
    pub fn set_highest(&self, number: TransactionNumber) -> bool {
        self.numbers.lock().set_highest(number)
    }

    pub fn tentative(&self) -> NumberSet {
        self.numbers.lock().tentative().clone()
    }

    pub fn verify_issued(&self, number: TransactionNumber) -> bool {
        self.numbers.lock().verify_issued(number)
    }

    pub fn verify_available(&self, number: TransactionNumber) -> bool {
        self.numbers.lock().verify_available(number)
    }

    pub fn verify_tentative(&self, number: TransactionNumber) -> bool {
        self.numbers.lock().verify_tentative(number)
    }

    pub fn add_tentative(&self, number: TransactionNumber) -> bool {
        self.numbers.lock().add_tentative(number)
    }

    pub fn remove_tentative(&self, number: TransactionNumber) -> bool {
        self.numbers.lock().remove_tentative(number)
    }

    /// Promote a tentative number to issued.
    pub fn accept_issued(&self, number: TransactionNumber) -> bool {
        let accepted = self.numbers.lock().accept_issued(number);
        self.refresh_gauge();
        accepted
    }

    /// Promote the tentative numbers listed in `statement`. Partial
    /// promotions stand even when this returns false.
    pub fn accept_issued_statement(&self, statement: &TransactionStatement) -> bool {
        let accepted = self.numbers.lock().accept_issued_statement(statement);
        if !accepted {
            warn!(
                notary = %self.notary_id,
                offered = ?statement.issued(),
                "Not every offered number was accepted"
            );
        }
        self.refresh_gauge();
        accepted
    }

    pub fn consume_available(&self, number: TransactionNumber) -> bool {
        self.numbers.lock().consume_available(number)
    }

    /// Reconcile with the notary's issued list.
    pub fn resync(&self, server_issued: &NumberSet) -> ResyncReport {
        let report = {
            let _state = self.state.lock();
            self.numbers.lock().resync(server_issued)
        };
        for number in &report.restored {
            warn!(notary = %self.notary_id, number, "Resync restored transaction number");
        }
        for number in &report.dropped {
            warn!(notary = %self.notary_id, number, "Resync dropped transaction number");
        }
        if report.is_clean() {
            debug!(notary = %self.notary_id, "Resync found no differences");
        }
        self.refresh_gauge();
        report
    }

    // --- command construction --------------------------------------------

    /// New request to this notary with request number, acknowledgements and
    /// local nymbox hash filled in.
    ///
    /// `pingNotary`, `registerNym` and `getRequestNumber` always carry
    /// request number 1 and leave the counter alone.
    pub fn initialize_server_command(&self, command: MessageType) -> Message {
        let mut message = Message::request(command, self.nym_id.clone(), self.notary_id.clone(), 1);
        self.restamp(&mut message);
        message
    }

    /// Give `message` a fresh request number, the current acknowledgements
    /// and the local nymbox hash.
    pub(crate) fn restamp(&self, message: &mut Message) {
        let mut state = self.state.lock();
        message.request_number = if message.command.requires_request_number() {
            let request = state.request;
            state.request += 1;
            request
        } else {
            1
        };
        message.acknowledged_replies = state.acknowledged.clone();
        message.nymbox_hash = state.local_nymbox_hash;
    }

    /// Sign a request with the nym key.
    pub fn finalize_server_command(&self, message: &mut Message) -> Result<(), ContextError> {
        sign_contract(&*self.signer, message)
    }

    // --- boxes -----------------------------------------------------------

    pub(crate) fn location<'a>(
        &'a self,
        box_type: BoxType,
        account: Option<&'a AccountId>,
    ) -> BoxLocation<'a> {
        BoxLocation {
            nym: &self.nym_id,
            notary: &self.notary_id,
            box_type,
            account,
        }
    }

    /// Load a stored box.
    pub fn load_box(
        &self,
        box_type: BoxType,
        account: Option<&AccountId>,
    ) -> Result<Option<Ledger>, ContextError> {
        self.repository.load_ledger(&self.location(box_type, account))
    }

    /// Save a box. A box the client changed is re-signed by the nym.
    pub(crate) fn store_box(&self, ledger: &mut Ledger, resign: bool) -> Result<(), ContextError> {
        if resign {
            ledger.header.signer = SignerRole::Nym;
            sign_contract(&*self.signer, ledger)?;
        }
        let account = ledger.header.account_id.clone();
        self.repository
            .save_ledger(&self.location(ledger.box_type, account.as_ref()), ledger)
    }

    fn load_or_create_box(&self, box_type: BoxType, account: &AccountId) -> Result<Ledger, ContextError> {
        match self.load_box(box_type, Some(account))? {
            Some(ledger) => {
                ledger.header.verify_owner(&self.nym_id, &self.notary_id)?;
                verify_contract(&*self.signer, &self.notary_id, &ledger)?;
                Ok(ledger)
            }
            None => {
                debug!(account = %account, box_type = box_type.as_str(), "Creating empty box");
                let header = ContractHeader::new(self.nym_id.clone(), self.notary_id.clone(), SignerRole::Nym)
                    .with_account(account.clone());
                let mut ledger = Ledger::new(box_type, header);
                self.store_box(&mut ledger, true)?;
                Ok(ledger)
            }
        }
    }

    /// Load the inbox and outbox of `account` for the current delivery.
    /// They are released when the delivery resolves.
    pub fn init_boxes(&self, account: &AccountId) -> Result<(), ContextError> {
        let inbox = self.load_or_create_box(BoxType::Inbox, account)?;
        let outbox = self.load_or_create_box(BoxType::Outbox, account)?;
        let mut state = self.state.lock();
        state.box_account = Some(account.clone());
        state.inbox = Some(inbox);
        state.outbox = Some(outbox);
        Ok(())
    }

    /// Inbox held for the current delivery.
    pub fn inbox(&self) -> Option<Ledger> {
        self.state.lock().inbox.clone()
    }

    /// Outbox held for the current delivery.
    pub fn outbox(&self) -> Option<Ledger> {
        self.state.lock().outbox.clone()
    }

    /// Drop the inbox and outbox.
    pub fn release_boxes(&self) {
        let mut state = self.state.lock();
        state.box_account = None;
        state.inbox = None;
        state.outbox = None;
    }
}

impl TransactionNumberApi for ServerContext {
    fn next_transaction_number(&self, purpose: MessageType) -> ManagedNumber {
        let taken = self.numbers.lock().next_number(purpose);
        match taken {
            Ok(number) => {
                debug!(notary = %self.notary_id, number, purpose = purpose.as_str(), "Checked out transaction number");
                self.refresh_gauge();
                ManagedNumber::new(number, &self.numbers)
            }
            Err(e) => {
                warn!(notary = %self.notary_id, purpose = purpose.as_str(), error = %e, "No transaction number");
                ManagedNumber::invalid()
            }
        }
    }

    fn issued(&self) -> NumberSet {
        self.numbers.lock().issued().clone()
    }

    fn available(&self) -> NumberSet {
        self.numbers.lock().available().clone()
    }

    fn available_count(&self) -> usize {
        self.numbers.lock().available_count()
    }

    fn consume_issued(&self, number: TransactionNumber) -> bool {
        let consumed = self.numbers.lock().consume_issued(number);
        self.refresh_gauge();
        consumed
    }

    fn recover_available(&self, number: TransactionNumber) -> bool {
        let recovered = self.numbers.lock().recover_available(number);
        self.refresh_gauge();
        recovered
    }

    fn statement(&self, adding: &NumberSet, removing: &NumberSet) -> TransactionStatement {
        self.numbers
            .lock()
            .statement(self.notary_id.clone(), adding, removing)
    }

    fn verify_statement(
        &self,
        statement: &TransactionStatement,
        excluded: &NumberSet,
        included: &NumberSet,
    ) -> Result<(), ContextError> {
        if statement.notary() != &self.notary_id {
            return Err(ContextError::WrongNotary {
                expected: self.notary_id.clone(),
                actual: statement.notary().clone(),
            });
        }
        self.numbers
            .lock()
            .verify_statement(statement, excluded, included)
    }
}
