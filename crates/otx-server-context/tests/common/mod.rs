//! Shared harness: a context wired to a scripted notary.

#![allow(dead_code)]

use otx_server_context::domain::{ContractHeader, SignerRole, Transaction, TransactionKind};
use otx_server_context::ports::sign_contract;
use otx_server_context::{
    ContextConfig, ContextDependencies, ContextError, DeliveryResult, Ed25519Signer,
    InMemoryKVStore, KeyValueStore, ManagedNumber, MockNotary, PendingArgs, ReplyObserver,
    ServerContext, ShutdownSignal, TransactionNumberApi,
};
use parking_lot::Mutex;
use shared_crypto::Ed25519KeyPair;
use shared_types::{AccountId, Message, MessageType, NotaryId, NymId, NumberSet, TransactionNumber};
use std::sync::Arc;

pub const NYM_SEED: [u8; 32] = [11; 32];
pub const NOTARY_SEED: [u8; 32] = [22; 32];

pub fn nym_id() -> NymId {
    NymId::new("nym-alice")
}

pub fn notary_id() -> NotaryId {
    NotaryId::new("notary-one")
}

pub fn account_id() -> AccountId {
    AccountId::new("acct-alice-usd")
}

/// Observer recording what the context told the wallet.
#[derive(Default)]
pub struct RecordingObserver {
    pub messages: Mutex<Vec<Vec<u8>>>,
    pub final_receipts: Mutex<Vec<TransactionNumber>>,
    pub accounts: Mutex<Vec<AccountId>>,
    pub replies: Mutex<Vec<MessageType>>,
}

impl ReplyObserver for RecordingObserver {
    fn nym_message_received(&self, _notary: &NotaryId, payload: &[u8]) {
        self.messages.lock().push(payload.to_vec());
    }

    fn final_receipt_received(&self, _notary: &NotaryId, opening_number: TransactionNumber) {
        self.final_receipts.lock().push(opening_number);
    }

    fn account_data_received(&self, account: &AccountId, _account_contract: &[u8]) {
        self.accounts.lock().push(account.clone());
    }

    fn reply_received(&self, reply: &Message) {
        self.replies.lock().push(reply.command);
    }
}

pub struct Harness {
    pub notary: Arc<MockNotary>,
    pub store: Arc<InMemoryKVStore>,
    pub observer: Arc<RecordingObserver>,
    pub shutdown: ShutdownSignal,
    pub config: ContextConfig,
    pub context: Arc<ServerContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ContextConfig::for_testing())
    }

    pub fn with_config(config: ContextConfig) -> Self {
        otx_telemetry::init_test_logging();
        let notary = Arc::new(MockNotary::new(notary_id(), NOTARY_SEED));
        notary.add_nym(nym_id(), Ed25519KeyPair::from_seed(NYM_SEED).public_key());
        let store = Arc::new(InMemoryKVStore::new());
        let observer = Arc::new(RecordingObserver::default());
        let shutdown = ShutdownSignal::new();
        let deps = Self::deps(&notary, &store, &observer, &shutdown);
        let context = Arc::new(ServerContext::new(notary_id(), deps, config.clone()));
        Self {
            notary,
            store,
            observer,
            shutdown,
            config,
            context,
        }
    }

    fn deps(
        notary: &Arc<MockNotary>,
        store: &Arc<InMemoryKVStore>,
        observer: &Arc<RecordingObserver>,
        shutdown: &ShutdownSignal,
    ) -> ContextDependencies {
        let signer = Ed25519Signer::new(nym_id(), Ed25519KeyPair::from_seed(NYM_SEED))
            .with_notary(notary_id(), notary.public_key());
        let store: Arc<dyn KeyValueStore> = store.clone();
        ContextDependencies::new(notary.clone(), Arc::new(signer), store)
            .with_observer(observer.clone())
            .with_shutdown(shutdown.clone())
    }

    /// Load a second context from the same store and notary.
    pub fn reopen(&self) -> Result<Arc<ServerContext>, ContextError> {
        let deps = Self::deps(&self.notary, &self.store, &self.observer, &self.shutdown);
        ServerContext::load(notary_id(), deps, self.config.clone()).map(Arc::new)
    }

    /// Queue `message` and wait for the outcome.
    pub async fn deliver(&self, message: Message, numbers: Vec<ManagedNumber>) -> DeliveryResult {
        self.deliver_with(message, PendingArgs::default(), numbers).await
    }

    pub async fn deliver_with(
        &self,
        message: Message,
        args: PendingArgs,
        numbers: Vec<ManagedNumber>,
    ) -> DeliveryResult {
        match self.context.queue(message, args, numbers) {
            Some(result) => result.await,
            None => panic!("context busy"),
        }
    }

    pub async fn send(&self, command: MessageType) -> DeliveryResult {
        let message = self.context.initialize_server_command(command);
        self.deliver(message, Vec::new()).await
    }

    pub async fn refresh(&self) -> DeliveryResult {
        match self.context.refresh_nymbox() {
            Some(result) => result.await,
            None => panic!("context busy"),
        }
    }

    /// Register and collect one blank's worth of numbers.
    pub async fn register_with_numbers(&self) -> NumberSet {
        assert!(self.send(MessageType::RegisterNym).await.is_success());
        assert!(self.send(MessageType::GetTransactionNumbers).await.is_success());
        assert!(self.refresh().await.is_success());
        self.context.available()
    }

    /// A signed transfer notarization spending `number`.
    pub fn transfer(&self, number: &ManagedNumber) -> Message {
        self.notarize(
            number.value(),
            TransactionKind::Transfer {
                recipient: AccountId::new("acct-bob-usd"),
                amount: 250,
            },
        )
    }

    pub fn notarize(&self, number: TransactionNumber, kind: TransactionKind) -> Message {
        let header = ContractHeader::new(nym_id(), notary_id(), SignerRole::Nym).with_account(account_id());
        let mut transaction = Transaction::new(header, number, kind);
        let signer = Ed25519Signer::new(nym_id(), Ed25519KeyPair::from_seed(NYM_SEED));
        sign_contract(&signer, &mut transaction).expect("sign transaction");

        let mut message = self
            .context
            .initialize_server_command(MessageType::NotarizeTransaction);
        message.account_id = Some(account_id());
        message.payload = transaction.to_bytes().expect("encode transaction");
        message
    }
}
