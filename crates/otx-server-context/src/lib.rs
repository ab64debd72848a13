//! # OTX Server Context
//!
//! Client-side consensus state between one nym and one notary.
//!
//! **Architecture:** Hexagonal (Domain + Ports/Adapters)
//!
//! ## Purpose
//!
//! Keeps the nym's view of its relationship with a notary consistent with
//! the notary's view:
//! - transaction numbers (issued, available, tentative, high-water mark)
//! - the request counter and acknowledged replies
//! - the nymbox and its hash
//! - one outgoing message at a time, driven to completion through nymbox
//!   synchronization when the notary says the client is behind
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | available ⊆ issued | `domain/numbers.rs` - every mutation |
//! | tentative ∩ issued = ∅ | `domain/numbers.rs` - `add_tentative()`, `accept_issued()` |
//! | highest never decreases | `domain/numbers.rs` - `set_highest()`, `update_highest()` |
//! | replies answer their request | `domain/invariants.rs` - `invariant_reply_matches()` |
//! | one delivery at a time | `application/state_machine.rs` - `enqueue()` |
//! | checked-out numbers return unless used | `domain/managed.rs` - `Drop` |
//!
//! ## Delivery States
//!
//! | State | Step |
//! |-------|------|
//! | `Idle` | nothing queued |
//! | `PendingSend` | send the queued message |
//! | `NeedNymbox` | download the abbreviated nymbox |
//! | `NeedBoxItems` | download missing nymbox receipts |
//! | `NeedProcessNymbox` | accept the nymbox, then resend or resolve |
//!
//! ## Module Structure
//!
//! ```text
//! otx-server-context/
//! ├── domain/          # Number book, ledgers, statements, context record
//! ├── ports/           # TransactionNumberApi (inbound) + connection, signer, store, observer (outbound)
//! ├── adapters/        # Ed25519 signer, key-value stores, scripted notary
//! ├── application/     # ServerContext, reply processing, delivery state machine
//! └── config.rs        # ContextConfig
//! ```

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{Ed25519Signer, FileBackedKVStore, InMemoryKVStore, MockNotary, ScriptedFault};
pub use application::{
    ContextDependencies, LedgerRepository, QueueResult, ServerContext, ShutdownSignal,
};
pub use config::{ContextConfig, DEFAULT_FAILURE_COUNT_LIMIT};
pub use domain::{
    ContextError, ContextRecord, DeliveryResult, DeliveryState, LastReplyStatus, Ledger,
    ManagedNumber, NetworkReply, PendingArgs, SendResult, TransactionNumbers,
    TransactionStatement,
};
pub use ports::{
    ContractSigner, KeyValueStore, NoopObserver, ReplyObserver, ServerConnection,
    TransactionNumberApi,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
