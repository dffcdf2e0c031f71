#![allow(clippy::unwrap_used, clippy::expect_used)]

use lockerstore_core::Context;
use lockerstore_store::{account, identity, Client, Identity, Predicate};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

fn setup_client() -> Client {
    let client = Client::open_in_memory().unwrap();
    client.migrate(&Context::background()).unwrap();
    client
}

fn arb_body() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        ".{0,12}".prop_map(Value::from),
        Just(Value::Null),
    ];
    prop::collection::btree_map("[a-z]{1,8}", leaf, 0..6)
        .prop_map(|m: BTreeMap<String, Value>| json!(m))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_level_deltas_accumulate(
        start in -1_000i32..1_000,
        deltas in prop::collection::vec(-1_000i32..1_000, 1..8),
    ) {
        let ctx = Context::background();
        let client = setup_client();
        let mut ident = client
            .identity()
            .create()
            .set_hash("h")
            .set_level(start)
            .set_encrypted_id("E")
            .set_encrypted_body("B")
            .save(&ctx)
            .unwrap();
        for d in &deltas {
            ident = client.identity().update_one(&ident).add_level(*d).save(&ctx).unwrap();
        }
        prop_assert_eq!(i64::from(ident.level), i64::from(start) + deltas.iter().map(|d| i64::from(*d)).sum::<i64>());
    }

    #[test]
    fn prop_set_then_add_in_one_update(
        stored in any::<i32>(),
        set in -100_000i32..100_000,
        delta in -100_000i32..100_000,
    ) {
        let ctx = Context::background();
        let client = setup_client();
        let ident = client
            .identity()
            .create()
            .set_hash("h")
            .set_level(stored)
            .set_encrypted_id("E")
            .set_encrypted_body("B")
            .save(&ctx)
            .unwrap();
        let updated = client
            .identity()
            .update_one(&ident)
            .set_level(set)
            .add_level(delta)
            .save(&ctx)
            .unwrap();
        prop_assert_eq!(i64::from(updated.level), i64::from(set) + i64::from(delta));
    }

    #[test]
    fn prop_delta_never_leaves_int32(stored in any::<i32>(), delta in any::<i32>()) {
        let ctx = Context::background();
        let client = setup_client();
        let ident = client
            .identity()
            .create()
            .set_hash("h")
            .set_level(stored)
            .set_encrypted_id("E")
            .set_encrypted_body("B")
            .save(&ctx)
            .unwrap();
        let result = client.identity().update_one(&ident).add_level(delta).save(&ctx);
        match i32::try_from(i64::from(stored) + i64::from(delta)) {
            Ok(sum) => prop_assert_eq!(result.unwrap().level, sum),
            Err(_) => {
                prop_assert!(result.unwrap_err().is_validation());
                prop_assert_eq!(client.identity().get(&ctx, ident.id).unwrap().level, stored);
            }
        }
    }

    #[test]
    fn prop_json_body_round_trips(body in arb_body()) {
        let ctx = Context::background();
        let client = setup_client();
        let created = client
            .account()
            .create()
            .set_did("did:prop")
            .set_state("active")
            .set_body(body.clone())
            .save(&ctx)
            .unwrap();
        prop_assert_eq!(&created.body, &body);
        let reread = client.account().get(&ctx, created.id).unwrap();
        prop_assert_eq!(reread.body, body);
    }

    #[test]
    fn prop_string_predicates_agree_with_str(
        hashes in prop::collection::btree_set("[ab%_*?\\[\\]]{0,5}", 1..12),
        needle in "[ab%_*?\\[\\]]{0,3}",
    ) {
        let ctx = Context::background();
        let client = setup_client();
        let repo = client.identity();
        repo.create_bulk(hashes.iter().map(|h| {
            repo.create()
                .set_hash(h.as_str())
                .set_level(0)
                .set_encrypted_id("E")
                .set_encrypted_body("B")
        }))
        .exec(&ctx)
        .unwrap();

        let matching = |pred: Predicate<Identity>| -> BTreeSet<String> {
            repo.query()
                .filter(pred)
                .all(&ctx)
                .unwrap()
                .into_iter()
                .map(|i| i.hash)
                .collect()
        };
        let expect = |f: &dyn Fn(&str) -> bool| -> BTreeSet<String> {
            hashes.iter().filter(|h| f(h)).cloned().collect()
        };

        prop_assert_eq!(
            matching(identity::HASH.contains(needle.as_str())),
            expect(&|h: &str| h.contains(needle.as_str()))
        );
        prop_assert_eq!(
            matching(identity::HASH.has_prefix(&needle)),
            expect(&|h: &str| h.starts_with(needle.as_str()))
        );
        prop_assert_eq!(
            matching(identity::HASH.has_suffix(&needle)),
            expect(&|h: &str| h.ends_with(needle.as_str()))
        );
    }

    #[test]
    fn prop_negation_partitions_rows(states in prop::collection::vec("[a-c]", 1..10)) {
        let ctx = Context::background();
        let client = setup_client();
        for (i, state) in states.iter().enumerate() {
            client
                .account()
                .create()
                .set_did(format!("did:{}", i))
                .set_state(state.as_str())
                .set_body(json!({}))
                .exec(&ctx)
                .unwrap();
        }
        let pred = || account::STATE.eq("a");
        let yes = client.account().query().filter(pred()).count(&ctx).unwrap();
        let no = client.account().query().filter(!pred()).count(&ctx).unwrap();
        prop_assert_eq!(yes + no, states.len());
    }
}
