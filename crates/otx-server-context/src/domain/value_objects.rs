//! Value objects for the delivery state machine.

use serde::{Deserialize, Serialize};
use shared_types::Message;
use std::fmt;

/// Position of the context in the delivery state machine.
///
/// ```text
/// [IDLE] ──queue──→ [PENDINGSEND] ──rejected──→ [NEEDNYMBOX]
///                        │                          │
///                        └──reply──→ [IDLE]        ↓
///                                             [NEEDBOXITEMS]
///                                                   │
///          [IDLE or PENDINGSEND] ←──────── [NEEDPROCESSNYMBOX]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// The pending message must be sent.
    PendingSend,
    /// The nymbox must be downloaded.
    NeedNymbox,
    /// Receipts for abbreviated nymbox entries must be downloaded.
    NeedBoxItems,
    /// Outstanding nymbox entries must be accepted.
    NeedProcessNymbox,
}

impl DeliveryState {
    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PendingSend => "pending_send",
            Self::NeedNymbox => "need_nymbox",
            Self::NeedBoxItems => "need_box_items",
            Self::NeedProcessNymbox => "need_process_nymbox",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LastReplyStatus {
    /// A reply arrived but could not be accepted.
    Invalid,
    /// No exchange yet.
    #[default]
    None,
    /// The notary accepted the message.
    MessageSuccess,
    /// The notary rejected the message.
    MessageFailed,
    /// The send timed out; the notary may or may not have processed it.
    Unknown,
    /// The message never left.
    NotSent,
}

impl LastReplyStatus {
    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::None => "none",
            Self::MessageSuccess => "success",
            Self::MessageFailed => "failed",
            Self::Unknown => "unknown",
            Self::NotSent => "not_sent",
        }
    }
}

/// Result reported by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    ValidReply,
    Timeout,
    InvalidReply,
    Error,
}

impl SendResult {
    /// Label for the failure metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidReply => "valid_reply",
            Self::Timeout => "timeout",
            Self::InvalidReply => "invalid_reply",
            Self::Error => "error",
        }
    }

    /// Status recorded when an exchange ends with this result.
    pub fn reply_status(&self) -> LastReplyStatus {
        match self {
            Self::ValidReply => LastReplyStatus::MessageSuccess,
            Self::Timeout => LastReplyStatus::Unknown,
            Self::InvalidReply => LastReplyStatus::Invalid,
            Self::Error => LastReplyStatus::NotSent,
        }
    }
}

/// What a connection hands back for one send.
#[derive(Debug, Clone)]
pub struct NetworkReply {
    pub result: SendResult,
    pub reply: Option<Message>,
}

impl NetworkReply {
    /// A reply arrived.
    pub fn valid(reply: Message) -> Self {
        Self {
            result: SendResult::ValidReply,
            reply: Some(reply),
        }
    }

    /// Nothing usable arrived.
    pub fn failed(result: SendResult) -> Self {
        Self {
            result,
            reply: None,
        }
    }
}

/// Resolution of a queued delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub status: LastReplyStatus,
    pub reply: Option<Message>,
}

impl DeliveryResult {
    /// Resolution with a reply.
    pub fn new(status: LastReplyStatus, reply: Option<Message>) -> Self {
        Self { status, reply }
    }

    /// Resolution for a delivery that gave up.
    pub fn not_sent() -> Self {
        Self {
            status: LastReplyStatus::NotSent,
            reply: None,
        }
    }

    /// True if the notary accepted the message.
    pub fn is_success(&self) -> bool {
        self.status == LastReplyStatus::MessageSuccess
    }
}

/// Caller-supplied arguments travelling with a queued message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingArgs {
    /// Free-form label (a task name, a recipient).
    pub label: String,
    /// Resync numbers from the `registerNym` reply.
    pub resync: bool,
}

impl PendingArgs {
    /// Arguments with a label only.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            resync: false,
        }
    }

    /// Arguments requesting a resync.
    pub fn resync() -> Self {
        Self {
            label: String::new(),
            resync: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        assert_eq!(DeliveryState::default(), DeliveryState::Idle);
        assert_eq!(LastReplyStatus::default(), LastReplyStatus::None);
    }

    #[test]
    fn test_send_result_status() {
        assert_eq!(SendResult::Timeout.reply_status(), LastReplyStatus::Unknown);
        assert_eq!(SendResult::Error.reply_status(), LastReplyStatus::NotSent);
    }

    #[test]
    fn test_not_sent_result() {
        let result = DeliveryResult::not_sent();
        assert!(!result.is_success());
        assert!(result.reply.is_none());
    }
}
