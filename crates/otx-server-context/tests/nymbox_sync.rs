//! Registration, number acquisition and nymbox processing against a
//! scripted notary.

mod common;

use common::{nym_id, Harness};
use otx_server_context::domain::TransactionType;
use otx_server_context::{DeliveryState, LastReplyStatus, TransactionNumberApi};
use shared_types::MessageType;

#[tokio::test]
async fn test_register_adopts_request_number() {
    let h = Harness::new();
    let result = h.send(MessageType::RegisterNym).await;

    assert!(result.is_success());
    assert_eq!(h.context.request(), 1);
    assert_eq!(h.context.delivery_state(), DeliveryState::Idle);
    assert_eq!(h.context.last_status(), LastReplyStatus::MessageSuccess);
}

#[tokio::test]
async fn test_blank_numbers_become_available() {
    let h = Harness::new();
    let available = h.register_with_numbers().await;

    assert_eq!(available, (100..105).collect());
    assert_eq!(h.context.issued(), h.notary.issued_to(&nym_id()));
    assert!(h.context.tentative().is_empty());
    assert_eq!(h.context.highest(), 104);
    assert!(h.notary.nymbox_types(&nym_id()).is_empty());
    assert!(h.context.nymbox_hash_match());
}

#[tokio::test]
async fn test_second_blank_extends_the_pool() {
    let h = Harness::new();
    h.register_with_numbers().await;

    assert!(h.send(MessageType::GetTransactionNumbers).await.is_success());
    assert!(h.refresh().await.is_success());

    assert_eq!(h.context.available_count(), 10);
    assert_eq!(h.context.issued(), h.notary.issued_to(&nym_id()));
}

#[tokio::test]
async fn test_nym_message_reaches_observer() {
    let h = Harness::new();
    assert!(h.send(MessageType::RegisterNym).await.is_success());
    h.notary.deliver_message(&nym_id(), b"hello alice".to_vec()).unwrap();

    assert!(h.refresh().await.is_success());

    assert_eq!(h.observer.messages.lock().as_slice(), &[b"hello alice".to_vec()]);
    assert!(h.notary.nymbox_types(&nym_id()).is_empty());
}

#[tokio::test]
async fn test_final_receipt_closes_opening_number() {
    let h = Harness::new();
    h.register_with_numbers().await;
    h.notary.deliver_final_receipt(&nym_id(), 100).unwrap();

    assert!(h.refresh().await.is_success());

    assert!(!h.context.verify_issued(100));
    assert!(!h.context.verify_available(100));
    assert_eq!(h.observer.final_receipts.lock().as_slice(), &[100]);
}

#[tokio::test]
async fn test_resync_on_register_restores_server_numbers() {
    let h = Harness::new();
    h.register_with_numbers().await;
    h.notary.issue_directly(&nym_id(), &[300, 301].into_iter().collect());

    let message = h.context.initialize_server_command(MessageType::RegisterNym);
    let result = h
        .deliver_with(message, otx_server_context::PendingArgs::resync(), Vec::new())
        .await;

    assert!(result.is_success());
    assert!(h.context.verify_available(300));
    assert!(h.context.verify_available(301));
    assert_eq!(h.context.highest(), 301);
}

#[tokio::test]
async fn test_empty_refresh_resolves_without_processing() {
    let h = Harness::new();
    assert!(h.send(MessageType::RegisterNym).await.is_success());

    let result = h.refresh().await;

    assert!(result.is_success());
    assert!(!h
        .notary
        .received_commands()
        .contains(&MessageType::ProcessNymbox));
    assert_eq!(h.notary.nymbox_types(&nym_id()), Vec::<TransactionType>::new());
}

#[tokio::test]
async fn test_acknowledged_reply_notice_is_only_counted() {
    let h = Harness::new();
    h.register_with_numbers().await;
    h.notary.set_lagging_acknowledgements(true);

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let message = h.transfer(&number);
    assert!(h.deliver(message, vec![number]).await.is_success());

    let notarized = h
        .notary
        .received()
        .iter()
        .rev()
        .find(|m| m.command == MessageType::NotarizeTransaction)
        .map(|m| m.request_number)
        .expect("notarization sent");
    assert!(h.context.verify_acknowledged(notarized));
    assert_eq!(h.notary.nymbox_types(&nym_id()), vec![TransactionType::ReplyNotice]);

    let issued = h.context.issued();
    let available = h.context.available();
    let tentative = h.context.tentative();
    let highest = h.context.highest();
    let sent_before = h.notary.received().len();

    assert!(h.refresh().await.is_success());

    assert_eq!(h.context.issued(), issued);
    assert_eq!(h.context.available(), available);
    assert_eq!(h.context.tentative(), tentative);
    assert_eq!(h.context.highest(), highest);
    assert!(h.context.verify_acknowledged(notarized));
    assert!(!h.notary.received()[sent_before..]
        .iter()
        .any(|m| m.command == MessageType::ProcessNymbox));
    assert_eq!(h.notary.nymbox_types(&nym_id()), vec![TransactionType::ReplyNotice]);
}
