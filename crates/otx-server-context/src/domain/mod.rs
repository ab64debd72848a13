//! # Domain Module
//!
//! Number bookkeeping, statements, ledgers and the delivery state types.

pub mod errors;
pub mod invariants;
pub mod ledger;
pub mod managed;
pub mod numbers;
pub mod payloads;
pub mod record;
pub mod statement;
pub mod value_objects;

pub use errors::*;
pub use invariants::*;
pub use ledger::*;
pub use managed::*;
pub use numbers::*;
pub use payloads::*;
pub use record::*;
pub use statement::*;
pub use value_objects::*;
