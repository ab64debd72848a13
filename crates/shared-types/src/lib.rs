//! # Shared Types Crate
//!
//! Protocol identifiers, numbering types and the signed `Message` envelope
//! shared by every Open-Transactions client crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type that crosses a crate boundary is
//!   defined here.
//! - **Opaque Crypto**: `Message` exposes `signing_bytes()`; the signature
//!   itself is produced by whoever owns the keys.

pub mod entities;
pub mod envelope;
pub mod errors;

pub use entities::*;
pub use envelope::Message;
pub use errors::*;
