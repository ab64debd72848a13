//! # Domain Invariants
//!
//! Rules checked at the boundaries where outside data enters the context.

use super::errors::ContextError;
use super::numbers::TransactionNumbers;
use shared_types::{Message, NotaryId, NymId};

/// Invariant: a reply answers the request it is paired with, from the
/// context's notary to the context's nym.
pub fn invariant_reply_matches(
    request: &Message,
    reply: &Message,
    nym: &NymId,
    notary: &NotaryId,
) -> Result<(), ContextError> {
    if !reply.is_reply {
        return Err(ContextError::ProtocolViolation(
            "expected a reply, got a request".into(),
        ));
    }
    if &reply.notary_id != notary {
        return Err(ContextError::WrongNotary {
            expected: notary.clone(),
            actual: reply.notary_id.clone(),
        });
    }
    if &reply.nym_id != nym {
        return Err(ContextError::WrongNym {
            expected: nym.clone(),
            actual: reply.nym_id.clone(),
        });
    }
    if reply.command != request.command {
        return Err(ContextError::ProtocolViolation(format!(
            "{} answered with {}",
            request.command.as_str(),
            reply.command.reply_name()
        )));
    }
    if reply.request_number != request.request_number {
        return Err(ContextError::ProtocolViolation(format!(
            "reply for request {} answers request {}",
            reply.request_number, request.request_number
        )));
    }
    Ok(())
}

/// Invariant: available ⊆ issued and tentative ∩ issued = ∅.
pub fn invariant_number_book(book: &TransactionNumbers) -> Result<(), ContextError> {
    if !book.available().is_subset(book.issued()) {
        return Err(ContextError::ProtocolViolation(
            "available numbers not issued".into(),
        ));
    }
    if !book.tentative().is_disjoint(book.issued()) {
        return Err(ContextError::ProtocolViolation(
            "tentative numbers already issued".into(),
        ));
    }
    Ok(())
}
