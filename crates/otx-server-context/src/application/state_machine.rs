//! # Delivery State Machine
//!
//! ```text
//!                 queue()                     refresh_nymbox()
//!                    |                               |
//!                    v                               v
//!   IDLE <---- PENDING_SEND ---(rejected)---> NEED_NYMBOX
//!    ^               ^                               |
//!    |               | (resend)                      v
//!    |               +------------------ NEED_BOX_ITEMS
//!    |               |                               |
//!    +---------------+---------------- NEED_PROCESS_NYMBOX
//! ```
//!
//! One delivery occupies the context at a time. Each tick performs at most
//! one step, persists the context and reports whether another tick is
//! needed. Failed exchanges are retried on the next tick until the failure
//! limit or the shutdown signal ends the delivery with `NotSent`.

use crate::application::context::ServerContext;
use crate::application::nymbox::NymboxAction;
use crate::domain::{
    ContextError, DeliveryResult, DeliveryState, LastReplyStatus, ManagedNumber, PendingArgs, SendResult,
};
use otx_telemetry::DELIVERIES_RESOLVED;
use shared_types::{BoxType, Message, MessageType, TransactionNumber};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Extra nymbox download rounds allowed when the hashes still differ after
/// processing.
const MAX_NYMBOX_ROUNDS: u32 = 3;

/// Completion handle for a queued delivery.
///
/// Resolves to `NotSent` if the context goes away before the delivery ends.
#[derive(Debug)]
pub struct QueueResult {
    receiver: oneshot::Receiver<DeliveryResult>,
}

impl Future for QueueResult {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| DeliveryResult::not_sent()))
    }
}

impl ServerContext {
    /// Queue `message` for delivery and start driving it.
    ///
    /// Returns `None` if another delivery is in progress; `numbers` then go
    /// back to the pool. Must be called inside a tokio runtime.
    pub fn queue(
        self: &Arc<Self>,
        message: Message,
        args: PendingArgs,
        numbers: Vec<ManagedNumber>,
    ) -> Option<QueueResult> {
        let result = self.enqueue(message, args, numbers)?;
        self.spawn_driver();
        Some(result)
    }

    /// Queue `message` without starting a driver. The caller ticks
    /// [`ServerContext::state_machine`] or calls [`ServerContext::run`].
    pub fn enqueue(
        &self,
        message: Message,
        args: PendingArgs,
        numbers: Vec<ManagedNumber>,
    ) -> Option<QueueResult> {
        let command = message.command;
        let result = self.occupy(DeliveryState::PendingSend, Some(message), args, numbers)?;
        info!(notary = %self.notary_id(), command = command.as_str(), "Queued message");
        Some(result)
    }

    /// Download and process the nymbox, then go idle.
    pub fn refresh_nymbox(self: &Arc<Self>) -> Option<QueueResult> {
        let result = self.enqueue_nymbox_refresh()?;
        self.spawn_driver();
        Some(result)
    }

    /// [`ServerContext::refresh_nymbox`] without starting a driver.
    pub fn enqueue_nymbox_refresh(&self) -> Option<QueueResult> {
        let result = self.occupy(DeliveryState::NeedNymbox, None, PendingArgs::default(), Vec::new())?;
        info!(notary = %self.notary_id(), "Queued nymbox refresh");
        Some(result)
    }

    fn occupy(
        &self,
        start: DeliveryState,
        message: Option<Message>,
        args: PendingArgs,
        numbers: Vec<ManagedNumber>,
    ) -> Option<QueueResult> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.delivery != DeliveryState::Idle {
                warn!(
                    notary = %self.notary_id(),
                    state = %state.delivery,
                    "Delivery in progress, not queueing"
                );
                drop(state);
                drop(numbers);
                self.refresh_gauge();
                return None;
            }
            state.delivery = start;
            state.pending_message = message;
            state.pending_args = args;
            state.pending_numbers = numbers;
            state.pending_result = Some(sender);
            state.failure_counter = 0;
            state.nymbox_rounds = 0;
            state.resend_after_nymbox = false;
            state.restamp_pending = false;
            state.recovered_reply = None;
            state.last_reply = None;
        }
        self.persist();
        Some(QueueResult { receiver })
    }

    /// Continue a delivery restored from storage.
    ///
    /// Returns `None` if the context is idle or the delivery already has a
    /// waiter.
    pub fn resume_delivery(self: &Arc<Self>) -> Option<QueueResult> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.delivery == DeliveryState::Idle || state.pending_result.is_some() {
                return None;
            }
            info!(notary = %self.notary_id(), state = %state.delivery, "Resuming delivery");
            state.pending_result = Some(sender);
            state.restamp_pending = state.delivery == DeliveryState::PendingSend;
        }
        self.spawn_driver();
        Some(QueueResult { receiver })
    }

    /// End the current delivery with `NotSent`. Returns false if idle.
    pub fn abandon_delivery(&self) -> bool {
        if self.delivery_state() == DeliveryState::Idle {
            return false;
        }
        warn!(notary = %self.notary_id(), "Abandoning delivery");
        self.resolve(DeliveryResult::not_sent());
        true
    }

    fn spawn_driver(self: &Arc<Self>) {
        if self.driver_active.swap(true, Ordering::SeqCst) {
            return;
        }
        let context = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                context.drive().await;
                context.driver_active.store(false, Ordering::SeqCst);
                // A delivery queued between the last tick and the release
                // above would otherwise have no driver.
                if context.delivery_state() == DeliveryState::Idle
                    || context.driver_active.swap(true, Ordering::SeqCst)
                {
                    break;
                }
            }
        });
    }

    /// Tick until the context is idle.
    pub async fn run(&self) {
        self.drive().await;
    }

    async fn drive(&self) {
        let pause = self.config.tick_interval();
        while self.state_machine().await {
            if pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(pause).await;
            }
        }
    }

    /// Perform one step of the current delivery. Returns true if another
    /// tick is needed.
    pub async fn state_machine(&self) -> bool {
        let current = self.delivery_state();
        debug!(notary = %self.notary_id(), state = %current, "Tick");

        match current {
            DeliveryState::Idle => return false,
            DeliveryState::PendingSend => self.pending_send().await,
            DeliveryState::NeedNymbox => self.need_nymbox().await,
            DeliveryState::NeedBoxItems => self.need_box_items().await,
            DeliveryState::NeedProcessNymbox => self.need_process_nymbox().await,
        }

        let (delivery, failures) = {
            let state = self.state.lock();
            (state.delivery, state.failure_counter)
        };
        if delivery == DeliveryState::Idle {
            return false;
        }
        if failures > self.config.failure_count_limit {
            error!(
                notary = %self.notary_id(),
                state = %delivery,
                failures,
                "Failure limit reached, giving up"
            );
            self.resolve(DeliveryResult::not_sent());
            return false;
        }
        if self.shutdown.is_triggered() {
            warn!(notary = %self.notary_id(), state = %delivery, "Shutting down mid-delivery");
            self.resolve(DeliveryResult::not_sent());
            return false;
        }
        self.persist();
        true
    }

    async fn pending_send(&self) {
        let (message, restamp, recovered) = {
            let mut state = self.state.lock();
            (
                state.pending_message.clone(),
                std::mem::take(&mut state.restamp_pending),
                state.recovered_reply.take(),
            )
        };
        if let Some(reply) = recovered {
            self.resolve(DeliveryResult::new(LastReplyStatus::MessageSuccess, Some(reply)));
            return;
        }
        let Some(mut message) = message else {
            warn!(notary = %self.notary_id(), "Nothing to send");
            self.resolve(DeliveryResult::not_sent());
            return;
        };
        if restamp {
            self.restamp(&mut message);
        }

        let outcome = self.attempt_delivery(&mut message).await;
        self.state.lock().pending_message = Some(message);

        if outcome.result != SendResult::ValidReply {
            return;
        }
        let Some(reply) = outcome.reply else { return };
        if reply.success {
            self.resolve(DeliveryResult::new(LastReplyStatus::MessageSuccess, Some(reply)));
            return;
        }

        let retry_after_sync = {
            let mut state = self.state.lock();
            let stale = reply.nymbox_hash.is_some() && reply.nymbox_hash != state.local_nymbox_hash;
            if stale && !state.resend_after_nymbox {
                state.resend_after_nymbox = true;
                state.delivery = DeliveryState::NeedNymbox;
                state.last_reply = Some(reply.clone());
                true
            } else {
                false
            }
        };
        if retry_after_sync {
            info!(notary = %self.notary_id(), "Message rejected with a stale nymbox, syncing before resend");
        } else {
            self.resolve(DeliveryResult::new(LastReplyStatus::MessageFailed, Some(reply)));
        }
    }

    async fn need_nymbox(&self) {
        let mut message = self.initialize_server_command(MessageType::GetNymbox);
        let outcome = self.attempt_delivery(&mut message).await;
        if outcome.accepted() {
            self.state.lock().delivery = DeliveryState::NeedBoxItems;
        } else if outcome.rejected() {
            self.record_failure(SendResult::ValidReply, "nymbox_rejected");
        }
    }

    async fn need_box_items(&self) {
        let nymbox = match self.load_box(BoxType::Nymbox, None) {
            Ok(Some(nymbox)) => nymbox,
            Ok(None) => {
                self.state.lock().delivery = DeliveryState::NeedNymbox;
                return;
            }
            Err(e) => {
                self.record_failure(SendResult::Error, e.reason());
                return;
            }
        };

        let missing = nymbox.missing_receipts();
        let batch = missing.len().min(self.config.max_box_receipts_per_tick);
        for number in missing.into_iter().take(batch) {
            let mut message = self.initialize_server_command(MessageType::GetBoxReceipt);
            message.box_type = Some(BoxType::Nymbox);
            message.transaction_number = number;

            let outcome = self.attempt_delivery(&mut message).await;
            if outcome.rejected() {
                warn!(number, "Notary no longer has the receipt, dropping entry");
                if let Err(e) = self.drop_nymbox_entry(number) {
                    self.record_failure(SendResult::Error, e.reason());
                    return;
                }
            } else if !outcome.accepted() {
                return;
            }
        }

        match self.load_box(BoxType::Nymbox, None) {
            Ok(Some(nymbox)) if nymbox.missing_receipts().is_empty() => {
                self.state.lock().delivery = DeliveryState::NeedProcessNymbox;
            }
            Ok(_) => {}
            Err(e) => self.record_failure(SendResult::Error, e.reason()),
        }
    }

    fn drop_nymbox_entry(&self, number: TransactionNumber) -> Result<(), ContextError> {
        if let Some(mut nymbox) = self.load_box(BoxType::Nymbox, None)? {
            nymbox.remove(number);
            self.store_box(&mut nymbox, true)?;
        }
        Ok(())
    }

    async fn need_process_nymbox(&self) {
        let nymbox = match self.load_box(BoxType::Nymbox, None) {
            Ok(Some(nymbox)) => nymbox,
            Ok(None) => {
                self.finish_nymbox();
                return;
            }
            Err(e) => {
                self.record_failure(SendResult::Error, e.reason());
                return;
            }
        };

        let action = match self.accept_entire_nymbox(&nymbox) {
            Ok(action) => action,
            Err(e) => {
                error!(notary = %self.notary_id(), error = %e, "Could not build nymbox acceptance");
                self.record_failure(SendResult::Error, e.reason());
                return;
            }
        };

        let (transaction, acceptance) = match action {
            NymboxAction::Nothing => {
                debug!(notary = %self.notary_id(), "Nymbox has nothing to accept");
                self.finish_nymbox();
                return;
            }
            NymboxAction::AlreadySeen(count) => {
                debug!(notary = %self.notary_id(), count, "Nymbox holds only processed reply notices");
                self.finish_nymbox();
                return;
            }
            NymboxAction::Accept(transaction, acceptance) => (transaction, acceptance),
        };

        let mut message = self.initialize_server_command(MessageType::ProcessNymbox);
        message.payload = match transaction.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                self.record_failure(SendResult::Error, e.reason());
                return;
            }
        };
        self.state.lock().nymbox_acceptance = Some(acceptance);

        let outcome = self.attempt_delivery(&mut message).await;
        if outcome.accepted() {
            {
                let mut state = self.state.lock();
                if state.pending_message.is_none() {
                    state.last_reply = outcome.reply;
                }
            }
            self.finish_nymbox();
        } else if outcome.rejected() {
            info!(notary = %self.notary_id(), "Nymbox changed under us, downloading again");
            {
                let mut state = self.state.lock();
                state.nymbox_acceptance = None;
                state.delivery = DeliveryState::NeedNymbox;
            }
            self.record_failure(SendResult::ValidReply, "process_nymbox_rejected");
        }
    }

    /// The nymbox is processed: go round again, resend the pending message,
    /// or resolve.
    fn finish_nymbox(&self) {
        let mut state = self.state.lock();
        let in_sync =
            state.local_nymbox_hash.is_some() && state.local_nymbox_hash == state.remote_nymbox_hash;
        if !in_sync && state.nymbox_rounds < MAX_NYMBOX_ROUNDS {
            state.nymbox_rounds += 1;
            state.delivery = DeliveryState::NeedNymbox;
            return;
        }

        if let Some(reply) = state.recovered_reply.take() {
            drop(state);
            self.resolve(DeliveryResult::new(LastReplyStatus::MessageSuccess, Some(reply)));
            return;
        }
        if state.resend_after_nymbox && state.pending_message.is_some() {
            state.delivery = DeliveryState::PendingSend;
            state.restamp_pending = true;
            return;
        }
        let reply = state.last_reply.take();
        drop(state);
        self.resolve(DeliveryResult::new(LastReplyStatus::MessageSuccess, reply));
    }

    /// End the current delivery and hand `result` to its waiter.
    pub(crate) fn resolve(&self, result: DeliveryResult) {
        let (sender, numbers) = {
            let mut state = self.state.lock();
            state.delivery = DeliveryState::Idle;
            state.last_status = result.status;
            state.pending_message = None;
            state.pending_args = PendingArgs::default();
            state.failure_counter = 0;
            state.nymbox_rounds = 0;
            state.resend_after_nymbox = false;
            state.restamp_pending = false;
            state.recovered_reply = None;
            state.last_reply = None;
            state.nymbox_acceptance = None;
            state.box_account = None;
            state.inbox = None;
            state.outbox = None;
            (
                state.pending_result.take(),
                std::mem::take(&mut state.pending_numbers),
            )
        };

        let recovered = numbers.iter().filter(|n| n.valid() && !n.success()).count();
        drop(numbers);
        self.refresh_gauge();
        self.persist();

        DELIVERIES_RESOLVED
            .with_label_values(&[result.status.as_str()])
            .inc();
        info!(
            notary = %self.notary_id(),
            status = result.status.as_str(),
            recovered,
            "Delivery resolved"
        );
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }
}
