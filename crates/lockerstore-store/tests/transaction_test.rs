//! Integration tests for transactions, file-backed pools and cancellation

#![allow(clippy::unwrap_used, clippy::expect_used)]

use lockerstore_core::{Context, StoreErrorKind};
use lockerstore_store::driver::TxState;
use lockerstore_store::{account, identity, Client, StoreConfig};
use serde_json::json;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn file_client(dir: &TempDir) -> Client {
    let client = Client::open(&StoreConfig::file(dir.path().join("store.db"))).unwrap();
    client.migrate(&Context::background()).unwrap();
    client
}

fn account_count(client: &Client) -> usize {
    client.account().query().count(&Context::background()).unwrap()
}

#[test]
fn test_commit_makes_writes_visible() {
    let ctx = Context::background();
    let dir = TempDir::new().unwrap();
    let client = file_client(&dir);

    let tx = client.begin(&ctx).unwrap();
    let a = tx
        .account()
        .create()
        .set_did("did:tx:a")
        .set_state("active")
        .set_body(json!({}))
        .save(&ctx)
        .unwrap();
    tx.identity()
        .create()
        .set_hash("h")
        .set_level(0)
        .set_encrypted_id("E")
        .set_encrypted_body("B")
        .set_account(&a)
        .exec(&ctx)
        .unwrap();

    // Readable inside, invisible outside until commit
    assert_eq!(tx.account().query().count(&ctx).unwrap(), 1);
    assert_eq!(account_count(&client), 0);

    tx.commit().unwrap();
    assert_eq!(tx.state(), TxState::Committed);
    assert_eq!(account_count(&client), 1);
    assert_eq!(client.account().query_identities(&a).count(&ctx).unwrap(), 1);
}

#[test]
fn test_rollback_discards_writes() {
    let ctx = Context::background();
    let dir = TempDir::new().unwrap();
    let client = file_client(&dir);

    let tx = client.begin(&ctx).unwrap();
    tx.account()
        .create()
        .set_did("did:tx:a")
        .set_state("active")
        .set_body(json!({}))
        .exec(&ctx)
        .unwrap();
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(account_count(&client), 0);
}

#[test]
fn test_handles_fail_after_the_transaction_ends() {
    let ctx = Context::background();
    let client = Client::open_in_memory().unwrap();
    client.migrate(&ctx).unwrap();

    let tx = client.begin(&ctx).unwrap();
    let repo = tx.account();
    let inner = tx.client();
    tx.commit().unwrap();

    let err = repo
        .create()
        .set_did("did:late")
        .set_state("active")
        .set_body(json!({}))
        .exec(&ctx)
        .unwrap_err();
    assert!(err.is_not_in_transaction());
    assert!(inner.account().query().all(&ctx).unwrap_err().is_not_in_transaction());
    assert!(tx.commit().unwrap_err().is_not_in_transaction());

    // The pinned connection went back to the pool
    assert_eq!(account_count(&client), 0);
}

#[test]
fn test_dropping_an_open_transaction_rolls_back() {
    let ctx = Context::background();
    let dir = TempDir::new().unwrap();
    let client = file_client(&dir);

    {
        let tx = client.begin(&ctx).unwrap();
        tx.account()
            .create()
            .set_did("did:dropped")
            .set_state("active")
            .set_body(json!({}))
            .exec(&ctx)
            .unwrap();
    }
    assert_eq!(account_count(&client), 0);

    // The write lock was released
    client
        .account()
        .create()
        .set_did("did:after")
        .set_state("active")
        .set_body(json!({}))
        .exec(&ctx)
        .unwrap();
    assert_eq!(account_count(&client), 1);
}

#[test]
fn test_failed_statement_inside_transaction_keeps_earlier_writes() {
    let ctx = Context::background();
    let dir = TempDir::new().unwrap();
    let client = file_client(&dir);

    let tx = client.begin(&ctx).unwrap();
    for did in ["did:a", "did:a"] {
        let _ = tx
            .account()
            .create()
            .set_did(did)
            .set_state("active")
            .set_body(json!({}))
            .exec(&ctx);
    }
    assert_eq!(tx.state(), TxState::Open);
    tx.commit().unwrap();
    assert_eq!(account_count(&client), 1);
}

#[test]
fn test_concurrent_writers_on_a_file_database() {
    let dir = TempDir::new().unwrap();
    let client = file_client(&dir);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let client = client.clone();
            thread::spawn(move || {
                let ctx = Context::background();
                for i in 0..10 {
                    client
                        .account()
                        .create()
                        .set_did(format!("did:thread:{}:{}", t, i))
                        .set_state("active")
                        .set_body(json!({ "t": t }))
                        .exec(&ctx)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(account_count(&client), 40);
    let stats = client.pool_stats().unwrap();
    assert!(stats.open <= stats.max_open);
    assert_eq!(stats.idle, stats.open);
}

#[test]
fn test_cancelled_context_stops_before_sql() {
    let client = Client::open_in_memory().unwrap();
    client.migrate(&Context::background()).unwrap();

    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    let err = client
        .account()
        .create()
        .set_did("did:cancelled")
        .set_state("active")
        .set_body(json!({}))
        .exec(&ctx)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(client.account().query().all(&ctx).unwrap_err().is_cancelled());
    assert!(client.begin(&ctx).unwrap_err().is_cancelled());
    assert_eq!(account_count(&client), 0);
}

#[test]
fn test_expired_deadline() {
    let client = Client::open_in_memory().unwrap();
    client.migrate(&Context::background()).unwrap();

    let ctx = Context::background().with_timeout(Duration::ZERO);
    thread::sleep(Duration::from_millis(2));
    let err = client
        .account()
        .query()
        .filter(account::STATE.eq("active"))
        .count(&ctx)
        .unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::DeadlineExceeded);
}

#[test]
fn test_deadline_passing_mid_update_rolls_back() {
    let client = Client::open_in_memory().unwrap();
    let bg = Context::background();
    client.migrate(&bg).unwrap();
    let repo = client.identity();
    repo.create_bulk((0..20_000).map(|i| {
        repo.create()
            .set_hash(format!("h{}", i))
            .set_level(0)
            .set_encrypted_id("E")
            .set_encrypted_body("B")
    }))
    .exec(&bg)
    .unwrap();

    let ctx = bg.with_timeout(Duration::from_millis(1));
    let err = repo.update().add_level(1).save(&ctx).unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::DeadlineExceeded);

    assert_eq!(
        repo.query()
            .filter(identity::LEVEL.neq(0))
            .count(&bg)
            .unwrap(),
        0
    );
}
