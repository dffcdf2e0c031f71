//! Integration tests for eager loading of edges

#![allow(clippy::unwrap_used, clippy::expect_used)]

use lockerstore_core::Context;
use lockerstore_store::{account, identity, locker, Account, Client};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn setup_client() -> Client {
    let client = Client::open_in_memory().unwrap();
    client.migrate(&Context::background()).unwrap();
    client
}

fn create_account(client: &Client, did: &str) -> Account {
    client
        .account()
        .create()
        .set_did(did)
        .set_state("active")
        .set_body(json!({}))
        .save(&Context::background())
        .unwrap()
}

/// Two accounts: `a` owns identities at levels 1 and 5 and a locker, `b` owns nothing
fn seed(client: &Client) -> (Account, Account) {
    let ctx = Context::background();
    let a = create_account(client, "did:a");
    let b = create_account(client, "did:b");
    for (hash, level) in [("h1", 1), ("h5", 5)] {
        client
            .identity()
            .create()
            .set_hash(hash)
            .set_level(level)
            .set_encrypted_id("E")
            .set_encrypted_body("B")
            .set_account(&a)
            .exec(&ctx)
            .unwrap();
    }
    client
        .identity()
        .create()
        .set_hash("orphan")
        .set_level(9)
        .set_encrypted_id("E")
        .set_encrypted_body("B")
        .exec(&ctx)
        .unwrap();
    client
        .locker()
        .create()
        .set_hash("l1")
        .set_level(0)
        .set_encrypted_id("E")
        .set_encrypted_body("B")
        .set_account(&a)
        .exec(&ctx)
        .unwrap();
    (a, b)
}

fn counting_client(client: &Client) -> (Client, Arc<Mutex<Vec<String>>>) {
    let statements = Arc::new(Mutex::new(Vec::new()));
    let sink = statements.clone();
    let debug = client.with_debug_log(move |line| sink.lock().unwrap().push(line.to_string()));
    (debug, statements)
}

#[test]
fn test_load_children_of_many_parents() {
    let ctx = Context::background();
    let client = setup_client();
    let (a, b) = seed(&client);

    let accounts = client
        .account()
        .query()
        .order(account::ID.asc())
        .with_identities()
        .with_lockers()
        .all(&ctx)
        .unwrap();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].id, a.id);

    let mut hashes: Vec<_> = accounts[0]
        .edges
        .identities()
        .unwrap()
        .iter()
        .map(|i| i.hash.clone())
        .collect();
    hashes.sort();
    assert_eq!(hashes, ["h1", "h5"]);
    assert_eq!(accounts[0].edges.lockers().unwrap().len(), 1);

    // Loaded but empty is not the same as not loaded
    assert_eq!(accounts[1].id, b.id);
    assert!(accounts[1].edges.identities().unwrap().is_empty());
    let err = accounts[1].edges.properties().unwrap_err();
    assert!(err.is_not_loaded());
    assert_eq!(err.field(), Some("properties"));
}

#[test]
fn test_one_query_per_requested_edge() {
    let ctx = Context::background();
    let client = setup_client();
    seed(&client);
    let (debug, statements) = counting_client(&client);

    debug
        .account()
        .query()
        .with_identities()
        .with_lockers()
        .all(&ctx)
        .unwrap();
    assert_eq!(statements.lock().unwrap().len(), 3);

    // No parents, no secondary query
    statements.lock().unwrap().clear();
    let none = debug
        .account()
        .query()
        .filter(account::DID.eq("did:missing"))
        .with_identities()
        .all(&ctx)
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(statements.lock().unwrap().len(), 1);
}

#[test]
fn test_filtered_edge_query() {
    let ctx = Context::background();
    let client = setup_client();
    let (a, _) = seed(&client);

    let loaded = client
        .account()
        .query()
        .filter(account::ID.eq(a.id))
        .with_identities_query(|q| q.filter(identity::LEVEL.gt(2)))
        .only(&ctx)
        .unwrap();
    let identities = loaded.edges.identities().unwrap();
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].hash, "h5");
}

#[test]
fn test_load_owner_of_children() {
    let ctx = Context::background();
    let client = setup_client();
    let (a, _) = seed(&client);

    let identities = client
        .identity()
        .query()
        .order(identity::HASH.asc())
        .with_account()
        .all(&ctx)
        .unwrap();
    assert_eq!(identities.len(), 3);
    for i in &identities {
        let owner = i.edges.account().unwrap();
        // The owner is present exactly when the foreign key is set
        assert_eq!(owner.map(|o| o.id), i.account_id);
    }
    assert_eq!(identities[0].edges.account().unwrap().unwrap().did, a.did);
    assert!(identities[2].edges.account().unwrap().is_none());

    let plain = client
        .identity()
        .query()
        .filter(identity::HASH.eq("h1"))
        .only(&ctx)
        .unwrap();
    assert!(plain.edges.account().unwrap_err().is_not_loaded());
}

#[test]
fn test_owner_query_with_filter() {
    let ctx = Context::background();
    let client = setup_client();
    seed(&client);

    let lockers = client
        .locker()
        .query()
        .filter(locker::HASH.eq("l1"))
        .with_account_query(|q| q.filter(account::STATE.eq("closed")))
        .all(&ctx)
        .unwrap();
    assert_eq!(lockers.len(), 1);
    assert!(lockers[0].account_id.is_some());
    assert!(lockers[0].edges.account().unwrap().is_none());
}

#[test]
fn test_nested_eager_load() {
    let ctx = Context::background();
    let client = setup_client();
    let (a, _) = seed(&client);

    let loaded = client
        .account()
        .query()
        .filter(account::ID.eq(a.id))
        .with_identities_query(|q| q.order(identity::LEVEL.desc()).with_account())
        .only(&ctx)
        .unwrap();
    let identities = loaded.edges.identities().unwrap();
    assert_eq!(identities[0].hash, "h5");
    for i in identities {
        assert_eq!(i.edges.account().unwrap().unwrap().id, a.id);
    }
}

#[test]
fn test_eager_load_across_many_parents() {
    let ctx = Context::background();
    let client = setup_client();
    let accounts = client
        .account()
        .create_bulk((0..1500).map(|i| {
            client
                .account()
                .create()
                .set_did(format!("did:many:{}", i))
                .set_state("active")
                .set_body(json!({}))
        }))
        .save(&ctx)
        .unwrap();
    client
        .identity()
        .create_bulk(accounts.iter().map(|a| {
            client
                .identity()
                .create()
                .set_hash(format!("h-{}", a.did))
                .set_level(0)
                .set_encrypted_id("E")
                .set_encrypted_body("B")
                .set_account(a)
        }))
        .exec(&ctx)
        .unwrap();

    let loaded = client
        .account()
        .query()
        .with_identities()
        .all(&ctx)
        .unwrap();
    assert_eq!(loaded.len(), 1500);
    for a in &loaded {
        let identities = a.edges.identities().unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].hash, format!("h-{}", a.did));
    }

    let identities = client
        .identity()
        .query()
        .with_account()
        .all(&ctx)
        .unwrap();
    assert_eq!(identities.len(), 1500);
    assert!(identities
        .iter()
        .all(|i| i.edges.account().unwrap().map(|a| a.id) == i.account_id));
}
