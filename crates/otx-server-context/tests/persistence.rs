//! Saving, restoring and resuming contexts.

mod common;

use common::{account_id, notary_id, nym_id, Harness};
use otx_server_context::application::BoxLocation;
use otx_server_context::{
    DeliveryState, FileBackedKVStore, KeyValueStore, LastReplyStatus, LedgerRepository,
    PendingArgs, TransactionNumberApi,
};
use shared_types::{BoxType, MessageType};
use std::sync::Arc;

#[tokio::test]
async fn test_reopened_context_keeps_numbers() {
    let h = Harness::new();
    let available = h.register_with_numbers().await;
    h.context.set_admin_password("hunter2");
    h.context.set_revision(7);
    h.context.save().unwrap();

    let restored = h.reopen().unwrap();

    assert_eq!(restored.available(), available);
    assert_eq!(restored.issued(), h.context.issued());
    assert_eq!(restored.highest(), 104);
    assert_eq!(restored.request(), h.context.request());
    assert_eq!(restored.local_nymbox_hash(), h.context.local_nymbox_hash());
    assert_eq!(restored.admin_password(), "hunter2");
    assert!(restored.stale_nym(8));
    assert!(!restored.stale_nym(7));
}

#[tokio::test]
async fn test_interrupted_delivery_resumes() {
    let h = Harness::new();
    h.register_with_numbers().await;

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let spent = number.value();
    let message = h.transfer(&number);
    let _abandoned = h
        .context
        .enqueue(message, PendingArgs::labelled("transfer"), vec![number])
        .unwrap();

    let restored = h.reopen().unwrap();
    assert_eq!(restored.delivery_state(), DeliveryState::PendingSend);
    assert!(!restored.verify_available(spent), "pending number stays checked out");

    let result = restored.resume_delivery().expect("delivery to resume").await;

    assert!(result.is_success());
    assert!(!restored.verify_issued(spent));
    assert!(restored.resume_delivery().is_none());
}

#[tokio::test]
async fn test_abandoned_restore_returns_numbers() {
    let h = Harness::new();
    h.register_with_numbers().await;

    let number = h.context.next_transaction_number(MessageType::NotarizeTransaction);
    let spent = number.value();
    let message = h.transfer(&number);
    let _abandoned = h
        .context
        .enqueue(message, PendingArgs::default(), vec![number])
        .unwrap();

    let restored = h.reopen().unwrap();
    assert!(restored.abandon_delivery());

    assert_eq!(restored.last_status(), LastReplyStatus::NotSent);
    assert!(restored.verify_available(spent));
    assert_eq!(h.reopen().unwrap().delivery_state(), DeliveryState::Idle);
}

#[tokio::test]
async fn test_downloaded_nymbox_is_stored() {
    let h = Harness::new();
    assert!(h.send(MessageType::RegisterNym).await.is_success());
    h.notary.deliver_message(&nym_id(), b"stored".to_vec()).unwrap();

    let message = h.context.initialize_server_command(MessageType::GetNymbox);
    assert!(h.deliver(message, Vec::new()).await.is_success());

    let store: Arc<dyn KeyValueStore> = h.store.clone();
    let repository = LedgerRepository::new(store);
    let (nym, notary) = (nym_id(), notary_id());
    let location = BoxLocation {
        nym: &nym,
        notary: &notary,
        box_type: BoxType::Nymbox,
        account: None,
    };
    let nymbox = repository.load_ledger(&location).unwrap().expect("nymbox saved");
    assert_eq!(nymbox.len(), 1);
    assert_eq!(nymbox.missing_receipts().len(), 1);
    assert_eq!(Some(nymbox.content_hash().unwrap()), h.context.local_nymbox_hash());
}

#[tokio::test]
async fn test_account_boxes_created_and_refreshed() {
    let h = Harness::new();
    assert!(h.send(MessageType::RegisterNym).await.is_success());

    h.context.init_boxes(&account_id()).unwrap();
    assert_eq!(h.context.inbox().unwrap().box_type, BoxType::Inbox);
    assert_eq!(h.context.outbox().unwrap().box_type, BoxType::Outbox);

    let mut message = h.context.initialize_server_command(MessageType::GetAccountData);
    message.account_id = Some(account_id());
    assert!(h.deliver(message, Vec::new()).await.is_success());

    assert_eq!(h.observer.accounts.lock().as_slice(), &[account_id()]);
    assert!(h.context.inbox().is_none(), "boxes are released when the delivery resolves");
    h.context.init_boxes(&account_id()).unwrap();
    assert!(h.context.inbox().unwrap().is_empty());
}

#[tokio::test]
async fn test_unregister_resets_context() {
    let h = Harness::new();
    h.register_with_numbers().await;

    assert!(h.send(MessageType::UnregisterNym).await.is_success());

    assert_eq!(h.context.available_count(), 0);
    assert_eq!(h.context.request(), 0);
    assert!(h.context.local_nymbox_hash().is_none());
    assert_eq!(h.reopen().unwrap().available_count(), 0);
}

#[test]
fn test_file_store_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("otx-ctx-{}", std::process::id()));
    let path = dir.join("contexts.db");
    let _ = std::fs::remove_file(&path);
    std::fs::create_dir_all(&dir).unwrap();

    {
        let store = FileBackedKVStore::open(&path).unwrap();
        store.put(b"context/a", b"one").unwrap();
    }
    let store = FileBackedKVStore::open(&path).unwrap();
    assert_eq!(store.get(b"context/a").unwrap(), Some(b"one".to_vec()));

    let _ = std::fs::remove_file(&path);
}
