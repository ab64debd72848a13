//! # Adapters
//!
//! Implementations of the outbound ports.

pub mod ed25519_signer;
pub mod file_store;
pub mod memory_store;
pub mod mock_notary;

pub use ed25519_signer::Ed25519Signer;
pub use file_store::FileBackedKVStore;
pub use memory_store::InMemoryKVStore;
pub use mock_notary::{MockNotary, ScriptedFault};
