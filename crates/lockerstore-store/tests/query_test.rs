//! Integration tests for the query builder
//!
//! Predicates, ordering, paging, terminals, projections, edge predicates,
//! traversals and interceptors against an in-memory database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use lockerstore_core::{Context, StoreErrorKind};
use lockerstore_store::hook::{interceptor, querier, Querier};
use lockerstore_store::{access_key, account, identity, locker, Account, Aggregate, Client};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn setup_client() -> Client {
    let client = Client::open_in_memory().unwrap();
    client.migrate(&Context::background()).unwrap();
    client
}

fn create_account(client: &Client, did: &str, state: &str, email: Option<&str>) -> Account {
    client
        .account()
        .create()
        .set_did(did)
        .set_state(state)
        .set_nillable_email(email.map(String::from))
        .set_body(json!({ "did": did }))
        .save(&Context::background())
        .unwrap()
}

fn seed_accounts(client: &Client) -> Vec<Account> {
    vec![
        create_account(client, "did:example:alice", "active", Some("Alice@Example.com")),
        create_account(client, "did:example:bob", "active", None),
        create_account(client, "did:example:carol", "suspended", Some("carol@example.org")),
        create_account(client, "did:other:dave", "active", Some("dave@example.com")),
    ]
}

fn create_identity(client: &Client, hash: &str, level: i32, owner: Option<&Account>) -> i64 {
    client
        .identity()
        .create()
        .set_hash(hash)
        .set_level(level)
        .set_encrypted_id(format!("E-{}", hash))
        .set_encrypted_body(format!("B-{}", hash))
        .set_nillable_account_id(owner.map(|a| a.id))
        .save(&Context::background())
        .unwrap()
        .id
}

fn dids(accounts: &[Account]) -> Vec<&str> {
    accounts.iter().map(|a| a.did.as_str()).collect()
}

#[test]
fn test_field_predicates() {
    let ctx = Context::background();
    let client = setup_client();
    seed_accounts(&client);
    let q = || client.account().query().order(account::ID.asc());

    let active = q().filter(account::STATE.eq("active")).all(&ctx).unwrap();
    assert_eq!(
        dids(&active),
        ["did:example:alice", "did:example:bob", "did:other:dave"]
    );

    let not_active = q().filter(account::STATE.neq("active")).all(&ctx).unwrap();
    assert_eq!(dids(&not_active), ["did:example:carol"]);

    let prefixed = q()
        .filter(account::DID.has_prefix("did:example:"))
        .count(&ctx)
        .unwrap();
    assert_eq!(prefixed, 3);

    let suffixed = q()
        .filter(account::EMAIL.has_suffix(".org"))
        .all(&ctx)
        .unwrap();
    assert_eq!(dids(&suffixed), ["did:example:carol"]);

    let contains = q().filter(account::DID.contains("ro")).all(&ctx).unwrap();
    assert_eq!(dids(&contains), ["did:example:carol"]);

    let fold = q()
        .filter(account::EMAIL.contains_fold("EXAMPLE.COM"))
        .all(&ctx)
        .unwrap();
    assert_eq!(dids(&fold), ["did:example:alice", "did:other:dave"]);

    let equal_fold = q()
        .filter(account::EMAIL.equal_fold("alice@example.com"))
        .only(&ctx)
        .unwrap();
    assert_eq!(equal_fold.did, "did:example:alice");

    let no_email = q().filter(account::EMAIL.is_nil()).all(&ctx).unwrap();
    assert_eq!(dids(&no_email), ["did:example:bob"]);
    assert_eq!(
        q().filter(account::EMAIL.not_nil()).count(&ctx).unwrap(),
        3
    );

    let some = q()
        .filter(account::DID.in_(["did:example:bob", "did:other:dave"]))
        .all(&ctx)
        .unwrap();
    assert_eq!(dids(&some), ["did:example:bob", "did:other:dave"]);
    let rest = q()
        .filter(account::DID.not_in(["did:example:bob", "did:other:dave"]))
        .count(&ctx)
        .unwrap();
    assert_eq!(rest, 2);

    let none: Vec<&str> = Vec::new();
    assert_eq!(
        q().filter(account::DID.in_(none)).count(&ctx).unwrap(),
        0
    );
}

#[test]
fn test_like_metacharacters_are_literal() {
    let ctx = Context::background();
    let client = setup_client();
    create_account(&client, "did:x:100%", "active", None);
    create_account(&client, "did:x:1000", "active", None);
    create_account(&client, "did:x:a_b", "active", None);
    create_account(&client, "did:x:axb", "active", None);

    let q = || client.account().query();
    assert_eq!(
        q().filter(account::DID.contains("%")).count(&ctx).unwrap(),
        1
    );
    assert_eq!(
        q().filter(account::DID.has_suffix("a_b")).count(&ctx).unwrap(),
        1
    );
    assert_eq!(
        q().filter(account::DID.has_prefix("did:x:1")).count(&ctx).unwrap(),
        2
    );
}

#[test]
fn test_numeric_comparisons_and_composition() {
    let ctx = Context::background();
    let client = setup_client();
    for (hash, level) in [("a", 1), ("b", 5), ("c", 10), ("d", -3)] {
        create_identity(&client, hash, level, None);
    }
    let hashes = |p| {
        client
            .identity()
            .query()
            .filter(p)
            .order(identity::HASH.asc())
            .all(&ctx)
            .unwrap()
            .into_iter()
            .map(|i| i.hash)
            .collect::<Vec<_>>()
    };

    assert_eq!(hashes(identity::LEVEL.gt(1)), ["b", "c"]);
    assert_eq!(hashes(identity::LEVEL.gte(1)), ["a", "b", "c"]);
    assert_eq!(hashes(identity::LEVEL.lt(1)), ["d"]);
    assert_eq!(hashes(identity::LEVEL.lte(5)), ["a", "b", "d"]);
    assert_eq!(
        hashes(identity::LEVEL.gt(0).and(identity::LEVEL.lt(10))),
        ["a", "b"]
    );
    assert_eq!(
        hashes(identity::HASH.eq("a").or(identity::HASH.eq("d"))),
        ["a", "d"]
    );
    assert_eq!(hashes(!identity::LEVEL.gt(1)), ["a", "d"]);
    assert_eq!(
        hashes(lockerstore_store::Predicate::or_any([
            identity::LEVEL.eq(10),
            identity::LEVEL.eq(-3),
        ])),
        ["c", "d"]
    );
}

#[test]
fn test_order_limit_offset() {
    let ctx = Context::background();
    let client = setup_client();
    seed_accounts(&client);

    let desc = client
        .account()
        .query()
        .order(account::DID.desc())
        .limit(2)
        .all(&ctx)
        .unwrap();
    assert_eq!(dids(&desc), ["did:other:dave", "did:example:carol"]);

    let page = client
        .account()
        .query()
        .order(account::ID.asc())
        .limit(2)
        .offset(1)
        .all(&ctx)
        .unwrap();
    assert_eq!(dids(&page), ["did:example:bob", "did:example:carol"]);

    // Offset without a limit starts from the (k+1)-th row
    let tail = client
        .account()
        .query()
        .order(account::ID.asc())
        .offset(3)
        .all(&ctx)
        .unwrap();
    assert_eq!(dids(&tail), ["did:other:dave"]);
}

#[test]
fn test_terminals() {
    let ctx = Context::background();
    let client = setup_client();
    let accounts = seed_accounts(&client);
    let q = || client.account().query();

    let err = q()
        .filter(account::DID.eq("did:missing"))
        .only(&ctx)
        .unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::NotFound);
    assert_eq!(err.label(), Some("account"));

    let err = q()
        .filter(account::STATE.eq("active"))
        .only(&ctx)
        .unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::NotSingular);
    assert_eq!(err.label(), Some("account"));

    let err = q()
        .filter(account::STATE.eq("active"))
        .only_id(&ctx)
        .unwrap_err();
    assert!(err.is_not_singular());

    assert_eq!(
        q().filter(account::STATE.eq("suspended"))
            .only_id(&ctx)
            .unwrap(),
        accounts[2].id
    );
    assert_eq!(
        q().order(account::ID.desc()).first_id(&ctx).unwrap(),
        Some(accounts[3].id)
    );
    assert!(q()
        .filter(account::DID.eq("did:missing"))
        .first(&ctx)
        .unwrap()
        .is_none());
    assert_eq!(
        q().order(account::ID.asc()).ids(&ctx).unwrap(),
        accounts.iter().map(|a| a.id).collect::<Vec<_>>()
    );
    assert_eq!(q().count(&ctx).unwrap(), 4);
    assert!(q().filter(account::STATE.eq("suspended")).exist(&ctx).unwrap());
    assert!(!q().filter(account::STATE.eq("closed")).exist(&ctx).unwrap());

    let got = client.account().get(&ctx, accounts[1].id).unwrap();
    assert_eq!(got, accounts[1]);
    let err = client.account().get(&ctx, 999).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
#[should_panic]
fn test_only_x_panics_on_empty() {
    let ctx = Context::background();
    let client = setup_client();
    client.account().query().only_x(&ctx);
}

#[test]
fn test_unknown_column_is_a_validation_error() {
    let ctx = Context::background();
    let client = setup_client();
    seed_accounts(&client);

    let err = client
        .account()
        .query()
        .order(lockerstore_store::Order::asc("nickname"))
        .all(&ctx)
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(err.field(), Some("nickname"));

    let err = client
        .account()
        .query()
        .select(&["did", "nickname"])
        .strings(&ctx)
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_select_group_by_aggregate() {
    let ctx = Context::background();
    let client = setup_client();
    seed_accounts(&client);

    let states = client
        .account()
        .query()
        .unique(true)
        .order(account::STATE.asc())
        .select(&["state"])
        .strings(&ctx)
        .unwrap();
    assert_eq!(states, ["active", "suspended"]);

    #[derive(Debug, Deserialize, PartialEq)]
    struct DidBody {
        did: String,
        body: serde_json::Value,
    }
    let rows: Vec<DidBody> = client
        .account()
        .query()
        .filter(account::DID.eq("did:example:bob"))
        .select(&["did", "body"])
        .scan(&ctx)
        .unwrap();
    assert_eq!(
        rows,
        [DidBody {
            did: "did:example:bob".into(),
            body: json!({ "did": "did:example:bob" }),
        }]
    );

    #[derive(Debug, Deserialize, PartialEq)]
    struct StateCount {
        state: String,
        count: i64,
    }
    let mut grouped: Vec<StateCount> = client
        .account()
        .query()
        .group_by(&["state"])
        .aggregate(Aggregate::count())
        .scan(&ctx)
        .unwrap();
    grouped.sort_by(|a, b| a.state.cmp(&b.state));
    assert_eq!(
        grouped,
        [
            StateCount {
                state: "active".into(),
                count: 3
            },
            StateCount {
                state: "suspended".into(),
                count: 1
            },
        ]
    );

    for (hash, level) in [("a", 2), ("b", 4), ("c", 9)] {
        create_identity(&client, hash, level, None);
    }
    let total = client
        .identity()
        .query()
        .aggregate(Aggregate::sum("level"))
        .int(&ctx)
        .unwrap();
    assert_eq!(total, Some(15));
    let max = client
        .identity()
        .query()
        .filter(identity::LEVEL.lt(9))
        .aggregate(Aggregate::max("level").alias("top"))
        .int(&ctx)
        .unwrap();
    assert_eq!(max, Some(4));
}

#[test]
fn test_edge_predicates_and_traversal() {
    let ctx = Context::background();
    let client = setup_client();
    let accounts = seed_accounts(&client);
    let (alice, bob) = (&accounts[0], &accounts[1]);
    create_identity(&client, "alice-1", 1, Some(alice));
    create_identity(&client, "alice-2", 7, Some(alice));
    create_identity(&client, "bob-1", 3, Some(bob));
    create_identity(&client, "orphan", 9, None);

    let with_identities = client
        .account()
        .query()
        .filter(account::has_identities())
        .order(account::ID.asc())
        .all(&ctx)
        .unwrap();
    assert_eq!(dids(&with_identities), ["did:example:alice", "did:example:bob"]);

    let high = client
        .account()
        .query()
        .filter(account::has_identities_with([identity::LEVEL.gte(5)]))
        .only(&ctx)
        .unwrap();
    assert_eq!(high.id, alice.id);

    let without = client
        .account()
        .query()
        .filter(!account::has_identities())
        .count(&ctx)
        .unwrap();
    assert_eq!(without, 2);

    let orphans = client
        .identity()
        .query()
        .filter(!identity::has_account())
        .only(&ctx)
        .unwrap();
    assert_eq!(orphans.hash, "orphan");

    let owned_by_active = client
        .identity()
        .query()
        .filter(identity::has_account_with([account::STATE.eq("active")]))
        .count(&ctx)
        .unwrap();
    assert_eq!(owned_by_active, 3);

    // Traversal from a query and from a loaded row
    let alice_identities = client
        .account()
        .query()
        .filter(account::DID.eq("did:example:alice"))
        .query_identities()
        .order(identity::HASH.asc())
        .all(&ctx)
        .unwrap();
    assert_eq!(
        alice_identities.iter().map(|i| i.hash.as_str()).collect::<Vec<_>>(),
        ["alice-1", "alice-2"]
    );
    assert_eq!(
        client.account().query_identities(bob).count(&ctx).unwrap(),
        1
    );

    let bob_1 = client
        .identity()
        .query()
        .filter(identity::HASH.eq("bob-1"))
        .only(&ctx)
        .unwrap();
    let owner = client
        .identity()
        .query_account(&bob_1)
        .only(&ctx)
        .unwrap();
    assert_eq!(owner.id, bob.id);
    let orphan = client
        .identity()
        .query()
        .filter(identity::HASH.eq("orphan"))
        .only(&ctx)
        .unwrap();
    assert!(!client.identity().query_account(&orphan).exist(&ctx).unwrap());

    let owners_of_high = client
        .identity()
        .query()
        .filter(identity::LEVEL.gte(3))
        .query_account()
        .order(account::ID.asc())
        .ids(&ctx)
        .unwrap();
    assert_eq!(owners_of_high, [alice.id, bob.id]);

    assert_eq!(
        client.account().query_lockers(alice).count(&ctx).unwrap(),
        0
    );
    assert!(client
        .locker()
        .query()
        .filter(locker::has_account())
        .all(&ctx)
        .unwrap()
        .is_empty());
    assert!(client
        .access_key()
        .query()
        .filter(access_key::DID.eq("nothing"))
        .all(&ctx)
        .unwrap()
        .is_empty());
}

#[test]
fn test_interceptor_sees_and_shapes_queries() {
    let ctx = Context::background();
    let client = setup_client();
    seed_accounts(&client);

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    client.account().intercept(interceptor(move |next: Querier| {
        let counter = counter.clone();
        querier(move |ctx, plan| {
            counter.fetch_add(1, Ordering::SeqCst);
            // Hide suspended accounts from every account query
            plan.filter(account::STATE.neq("suspended"))?;
            next(ctx, plan)
        })
    }));

    assert_eq!(client.account().query().count(&ctx).unwrap(), 3);
    assert!(client
        .account()
        .query()
        .filter(account::DID.eq("did:example:carol"))
        .first(&ctx)
        .unwrap()
        .is_none());
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    // Other entity kinds are unaffected
    assert_eq!(client.identity().query().count(&ctx).unwrap(), 0);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
