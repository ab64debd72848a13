//! # Application Module
//!
//! The server context and the delivery machinery around it.

pub mod context;
mod exchange;
mod nymbox;
mod reply;
pub mod repository;
pub mod state_machine;

pub use context::{ContextDependencies, ServerContext, ShutdownSignal};
pub use repository::{BoxLocation, LedgerRepository};
pub use state_machine::QueueResult;
