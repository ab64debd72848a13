//! Queued delivery: retries, resyncs, lost replies and the delivery slot.

mod common;

use common::{nym_id, Harness};
use otx_server_context::domain::TransactionKind;
use otx_server_context::{
    ContextConfig, DeliveryState, LastReplyStatus, PendingArgs, ScriptedFault,
    TransactionNumberApi,
};
use shared_types::MessageType;
use std::time::Duration;

#[tokio::test]
async fn test_transfer_consumes_number() {
    let h = Harness::new();
    h.register_with_numbers().await;

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    assert!(number.valid());
    let spent = number.value();
    let message = h.transfer(&number);

    let result = h.deliver(message, vec![number]).await;

    assert!(result.is_success());
    assert!(!h.context.verify_issued(spent));
    assert!(!h.context.verify_available(spent));
    assert_eq!(h.context.available_count(), 4);
}

#[tokio::test]
async fn test_timeouts_exhaust_failure_limit() {
    let h = Harness::new();
    h.register_with_numbers().await;
    for _ in 0..6 {
        h.notary.push_fault(ScriptedFault::Timeout);
    }

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let spent = number.value();
    let message = h.transfer(&number);
    let result = h.deliver(message, vec![number]).await;

    assert_eq!(result.status, LastReplyStatus::NotSent);
    assert!(result.reply.is_none());
    assert_eq!(h.context.delivery_state(), DeliveryState::Idle);
    assert!(h.context.verify_available(spent), "unused number returns to the pool");
    assert_eq!(h.context.available_count(), 5);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let h = Harness::new();
    assert!(h.send(MessageType::RegisterNym).await.is_success());
    h.notary.push_fault(ScriptedFault::TransportError);
    h.notary.push_fault(ScriptedFault::InvalidReply);

    let result = h.send(MessageType::GetTransactionNumbers).await;

    assert!(result.is_success());
    assert_eq!(h.context.failure_count(), 0);
}

#[tokio::test]
async fn test_request_drift_triggers_resync() {
    let h = Harness::new();
    assert!(h.send(MessageType::RegisterNym).await.is_success());
    h.notary.push_fault(ScriptedFault::RequestDrift);

    let result = h.send(MessageType::GetTransactionNumbers).await;

    assert!(result.is_success());
    let commands = h.notary.received_commands();
    assert!(commands.contains(&MessageType::GetRequestNumber));
    assert_eq!(h.context.request(), h.notary.expected_request(&nym_id()));
}

#[tokio::test]
async fn test_bad_signature_never_accepted() {
    let h = Harness::new();
    for _ in 0..6 {
        h.notary.push_fault(ScriptedFault::BadSignature);
    }

    let result = h.send(MessageType::RegisterNym).await;

    assert_eq!(result.status, LastReplyStatus::NotSent);
    assert_eq!(h.context.request(), 0);
}

#[tokio::test]
async fn test_lost_reply_recovered_from_reply_notice() {
    let h = Harness::new();
    h.register_with_numbers().await;
    h.notary.push_fault(ScriptedFault::DropReply);

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let spent = number.value();
    let message = h.transfer(&number);
    let result = h.deliver(message, vec![number]).await;

    assert!(result.is_success(), "status was {:?}", result.status);
    assert!(!h.context.verify_issued(spent));
    assert!(!h.context.verify_available(spent), "spent number must not be recovered");
    assert!(h.notary.nymbox_types(&nym_id()).is_empty());

    let notarizations = h
        .notary
        .received_commands()
        .into_iter()
        .filter(|c| *c == MessageType::NotarizeTransaction)
        .count();
    assert!(notarizations >= 2);
}

#[tokio::test]
async fn test_rejection_with_stale_nymbox_syncs_before_resend() {
    let h = Harness::new();
    h.register_with_numbers().await;
    // The notary closes 100 and tells the nym through its nymbox.
    h.notary.deliver_final_receipt(&nym_id(), 100).unwrap();

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    assert_eq!(number.value(), 100);
    let message = h.transfer(&number);
    let result = h.deliver(message, vec![number]).await;

    assert_eq!(result.status, LastReplyStatus::MessageFailed);
    assert!(!h.context.verify_issued(100));
    assert!(!h.context.verify_available(100));
    assert_eq!(h.observer.final_receipts.lock().as_slice(), &[100]);

    let commands = h.notary.received_commands();
    let first = commands
        .iter()
        .position(|c| *c == MessageType::NotarizeTransaction)
        .unwrap();
    let last = commands
        .iter()
        .rposition(|c| *c == MessageType::NotarizeTransaction)
        .unwrap();
    assert!(commands[first..last].contains(&MessageType::ProcessNymbox));
}

#[tokio::test]
async fn test_failed_resync_retried_next_tick() {
    let h = Harness::new();
    h.register_with_numbers().await;
    h.notary.push_fault(ScriptedFault::Reject);
    h.notary.push_fault(ScriptedFault::Reject);

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let spent = number.value();
    let message = h.transfer(&number);
    let result = h.deliver(message, vec![number]).await;

    assert!(result.is_success());
    assert!(!h.context.verify_issued(spent));
    let notarizations = h
        .notary
        .received_commands()
        .into_iter()
        .filter(|c| *c == MessageType::NotarizeTransaction)
        .count();
    assert_eq!(notarizations, 2);
}

#[tokio::test]
async fn test_cron_rejection_recovers_closing_numbers() {
    let h = Harness::new();
    h.register_with_numbers().await;
    h.notary.set_reject_cron(true);

    let opening = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let closing = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let (opening_value, closing_value) = (opening.value(), closing.value());
    let message = h.notarize(
        opening_value,
        TransactionKind::CronActivation {
            closing_numbers: [closing_value].into_iter().collect(),
        },
    );

    let result = h.deliver(message, vec![opening, closing]).await;

    assert!(result.is_success());
    assert!(!h.context.verify_issued(opening_value));
    assert!(h.context.verify_available(closing_value));
}

#[tokio::test]
async fn test_cron_activation_keeps_numbers_out_of_pool() {
    let h = Harness::new();
    h.register_with_numbers().await;

    let opening = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let closing = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let (opening_value, closing_value) = (opening.value(), closing.value());
    let message = h.notarize(
        opening_value,
        TransactionKind::CronActivation {
            closing_numbers: [closing_value].into_iter().collect(),
        },
    );

    assert!(h.deliver(message, vec![opening, closing]).await.is_success());

    assert!(h.context.verify_issued(opening_value));
    assert!(h.context.verify_issued(closing_value));
    assert!(!h.context.verify_available(opening_value));
    assert!(!h.context.verify_available(closing_value));
}

#[tokio::test]
async fn test_queue_refused_while_busy() {
    let h = Harness::new();
    h.register_with_numbers().await;

    let first = h.context.initialize_server_command(MessageType::PingNotary);
    let pending = h
        .context
        .enqueue(first, PendingArgs::labelled("ping"), Vec::new())
        .expect("slot is free");

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let spent = number.value();
    assert!(!h.context.verify_available(spent));
    let second = h.transfer(&number);
    assert!(h.context.enqueue(second, PendingArgs::default(), vec![number]).is_none());
    assert!(h.context.verify_available(spent), "refused numbers go back");

    h.context.run().await;
    assert!(pending.await.is_success());
    assert_eq!(h.context.delivery_state(), DeliveryState::Idle);
}

#[tokio::test]
async fn test_shutdown_resolves_not_sent() {
    let h = Harness::new();
    assert!(h.send(MessageType::RegisterNym).await.is_success());
    h.notary.push_fault(ScriptedFault::Timeout);
    h.shutdown.trigger();

    let result = h.send(MessageType::GetTransactionNumbers).await;

    assert_eq!(result.status, LastReplyStatus::NotSent);
    assert_eq!(h.context.delivery_state(), DeliveryState::Idle);
}

#[tokio::test]
async fn test_slow_notary_times_out() {
    let config = ContextConfig {
        send_timeout_ms: 20,
        ..ContextConfig::for_testing()
    };
    let h = Harness::with_config(config);
    h.notary.push_fault(ScriptedFault::Stall(Duration::from_millis(500)));

    let result = h.send(MessageType::RegisterNym).await;

    assert!(result.is_success(), "retry after the stalled attempt succeeds");
    assert_eq!(h.context.request(), 1);
}

#[tokio::test]
async fn test_abandon_releases_slot() {
    let h = Harness::new();
    h.register_with_numbers().await;

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let spent = number.value();
    let message = h.transfer(&number);
    let pending = h
        .context
        .enqueue(message, PendingArgs::default(), vec![number])
        .unwrap();

    assert!(h.context.abandon_delivery());
    assert_eq!(pending.await.status, LastReplyStatus::NotSent);
    assert!(h.context.verify_available(spent));
    assert!(!h.context.abandon_delivery());
}
