//! Row counts per table

use lockerstore_core::Context;
use lockerstore_store::{schema, Client};
use serde_json::{Map, Value};

pub fn execute(client: &Client) -> anyhow::Result<()> {
    let ctx = Context::background();
    let counts = [
        (schema::ACCOUNTS.name, client.account().query().count(&ctx)?),
        (schema::RECOVERY_CODES.name, client.recovery_code().query().count(&ctx)?),
        (schema::ACCESS_KEYS.name, client.access_key().query().count(&ctx)?),
        (schema::IDENTITIES.name, client.identity().query().count(&ctx)?),
        (schema::LOCKERS.name, client.locker().query().count(&ctx)?),
        (schema::PROPERTIES.name, client.property().query().count(&ctx)?),
        (schema::DID_DOCUMENTS.name, client.did().query().count(&ctx)?),
    ];

    let out: Map<String, Value> = counts
        .into_iter()
        .map(|(table, n)| (table.to_string(), Value::from(n)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
