//! # Shared Crypto
//!
//! The signing and hashing capabilities the notary context treats as opaque.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `signatures` | Ed25519 | Nym and notary message signatures |
//! | `hashing` | BLAKE3 (derive-key mode) | Nymbox and receipt content hashes |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod hashing;
pub mod signatures;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{
    blake3_hash, ledger_hash, receipt_hash, ContentHasher, LEDGER_DOMAIN, RECEIPT_DOMAIN,
};
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
