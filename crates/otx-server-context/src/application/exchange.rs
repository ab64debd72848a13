//! # Notary Exchange
//!
//! One request/reply round trip: sign, send under the configured timeout,
//! validate and process the reply. A rejection of a numbered request is
//! answered with a `getRequestNumber` resync and one retry.

use crate::application::context::ServerContext;
use crate::domain::{ContextError, LastReplyStatus, NetworkReply, SendResult};
use otx_telemetry::{DELIVERY_FAILURES, MESSAGES_SENT, REQUEST_RESYNCS};
use shared_types::{Message, MessageType, RequestNumber};
use tracing::{debug, error, warn};

/// Result of one delivery attempt.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryOutcome {
    pub(crate) result: SendResult,
    pub(crate) reply: Option<Message>,
}

impl DeliveryOutcome {
    fn valid(reply: Message) -> Self {
        Self {
            result: SendResult::ValidReply,
            reply: Some(reply),
        }
    }

    fn failed(result: SendResult) -> Self {
        Self {
            result,
            reply: None,
        }
    }

    /// A valid reply reporting success.
    pub(crate) fn accepted(&self) -> bool {
        self.result == SendResult::ValidReply && self.reply.as_ref().is_some_and(|r| r.success)
    }

    /// A valid reply reporting failure.
    pub(crate) fn rejected(&self) -> bool {
        self.result == SendResult::ValidReply && self.reply.as_ref().is_some_and(|r| !r.success)
    }
}

impl ServerContext {
    /// Deliver `message`, holding the exchange lock for the whole attempt.
    ///
    /// `message` may come back with a new request number if a resync
    /// happened.
    pub(crate) async fn attempt_delivery(&self, message: &mut Message) -> DeliveryOutcome {
        let _exchange = self.message_lock.lock().await;

        let outcome = self.exchange(message).await;
        if !outcome.rejected() || !message.command.requires_request_number() {
            return outcome;
        }

        REQUEST_RESYNCS.inc();
        warn!(
            notary = %self.notary_id(),
            command = message.command.as_str(),
            request = message.request_number,
            "Request rejected, resynchronizing request number"
        );
        if let Err(e) = self.exchange_request_number().await {
            self.record_failure(SendResult::Error, "resync");
            warn!(notary = %self.notary_id(), error = %e, "Request number resync failed");
            return DeliveryOutcome::failed(SendResult::Error);
        }

        self.restamp(message);
        self.exchange(message).await
    }

    /// Fetch the notary's request counter and adopt it.
    pub async fn update_request_number(&self) -> Result<RequestNumber, ContextError> {
        let _exchange = self.message_lock.lock().await;
        self.exchange_request_number().await
    }

    async fn exchange_request_number(&self) -> Result<RequestNumber, ContextError> {
        let mut message = self.initialize_server_command(MessageType::GetRequestNumber);
        let outcome = self.exchange(&mut message).await;
        if outcome.accepted() {
            Ok(self.request())
        } else {
            Err(ContextError::Transport(format!(
                "getRequestNumber ended with {}",
                outcome.result.as_str()
            )))
        }
    }

    /// Sign, send and process one message. The caller holds the exchange
    /// lock.
    async fn exchange(&self, message: &mut Message) -> DeliveryOutcome {
        if let Err(e) = self.finalize_server_command(message) {
            self.record_failure(SendResult::Error, e.reason());
            return DeliveryOutcome::failed(SendResult::Error);
        }

        MESSAGES_SENT
            .with_label_values(&[message.command.as_str()])
            .inc();
        debug!(
            endpoint = %self.connection.endpoint(),
            command = message.command.as_str(),
            request = message.request_number,
            "Sending request"
        );

        let send = self.connection.send(message, self.config.enable_push);
        let network = match tokio::time::timeout(self.config.send_timeout(), send).await {
            Ok(network) => network,
            Err(_) => NetworkReply::failed(SendResult::Timeout),
        };

        match (network.result, network.reply) {
            (SendResult::ValidReply, Some(reply)) => match self.process_reply(message, &reply) {
                Ok(()) => {
                    self.state.lock().last_status = if reply.success {
                        LastReplyStatus::MessageSuccess
                    } else {
                        LastReplyStatus::MessageFailed
                    };
                    DeliveryOutcome::valid(reply)
                }
                Err(e) => {
                    error!(
                        notary = %self.notary_id(),
                        command = message.command.as_str(),
                        error = %e,
                        "Discarding reply"
                    );
                    self.record_failure(SendResult::InvalidReply, e.reason());
                    DeliveryOutcome::failed(SendResult::InvalidReply)
                }
            },
            (SendResult::ValidReply, None) => {
                self.record_failure(SendResult::InvalidReply, "empty_reply");
                DeliveryOutcome::failed(SendResult::InvalidReply)
            }
            (result, _) => {
                self.record_failure(result, result.as_str());
                DeliveryOutcome::failed(result)
            }
        }
    }

    /// Count a failed exchange against the current delivery.
    pub(crate) fn record_failure(&self, result: SendResult, reason: &str) {
        let failures = {
            let mut state = self.state.lock();
            state.failure_counter += 1;
            if result != SendResult::ValidReply {
                state.last_status = result.reply_status();
            }
            state.failure_counter
        };
        DELIVERY_FAILURES.with_label_values(&[reason]).inc();
        warn!(
            notary = %self.notary_id(),
            result = result.as_str(),
            reason,
            failures,
            "Exchange failed"
        );
    }
}
