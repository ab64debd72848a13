//! # Content Hashing
//!
//! BLAKE3 digests used to fingerprint ledgers (the nymbox hash) and receipts.
//!
//! Every digest is domain-separated so a nymbox hash can never collide with a
//! receipt hash computed over the same bytes.

use blake3::Hasher;

/// BLAKE3 hash output (256-bit).
pub type Hash = [u8; 32];

/// Domain tag for ledger content hashes.
pub const LEDGER_DOMAIN: &str = "open-transactions ledger content v1";

/// Domain tag for box receipt hashes.
pub const RECEIPT_DOMAIN: &str = "open-transactions box receipt v1";

/// Stateful, domain-separated hasher.
pub struct ContentHasher {
    inner: Hasher,
}

impl ContentHasher {
    /// Create a hasher bound to `domain`.
    pub fn new(domain: &str) -> Self {
        Self {
            inner: Hasher::new_derive_key(domain),
        }
    }

    /// Update with data.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Update with a length-prefixed field so adjacent fields cannot shift.
    pub fn update_field(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(&(data.len() as u64).to_le_bytes());
        self.inner.update(data);
        self
    }

    /// Finalize and return hash.
    pub fn finalize(&self) -> Hash {
        *self.inner.finalize().as_bytes()
    }
}

/// Hash a serialized ledger.
pub fn ledger_hash(data: &[u8]) -> Hash {
    let mut hasher = ContentHasher::new(LEDGER_DOMAIN);
    hasher.update(data);
    hasher.finalize()
}

/// Hash a serialized box receipt.
pub fn receipt_hash(data: &[u8]) -> Hash {
    let mut hasher = ContentHasher::new(RECEIPT_DOMAIN);
    hasher.update(data);
    hasher.finalize()
}

/// Plain BLAKE3 (one-shot), used where no domain applies.
pub fn blake3_hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}
