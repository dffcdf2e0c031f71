//! Account inspection

use anyhow::Context as _;
use clap::{Args, Subcommand};
use lockerstore_core::Context;
use lockerstore_store::{account, Client};
use serde_json::json;

#[derive(Debug, Args)]
pub struct AccountArgs {
    #[command(subcommand)]
    pub command: AccountCommand,
}

#[derive(Debug, Subcommand)]
pub enum AccountCommand {
    /// Print an account and how many rows it owns
    Show { did: String },
}

pub fn execute(client: &Client, args: AccountArgs) -> anyhow::Result<()> {
    match args.command {
        AccountCommand::Show { did } => show(client, &did),
    }
}

fn show(client: &Client, did: &str) -> anyhow::Result<()> {
    let ctx = Context::background();
    let a = client
        .account()
        .query()
        .filter(account::DID.eq(did))
        .with_recovery_codes()
        .with_access_keys()
        .with_identities()
        .with_lockers()
        .with_properties()
        .only(&ctx)
        .with_context(|| format!("looking up account {}", did))?;

    let out = json!({
        "id": a.id,
        "did": a.did,
        "state": a.state,
        "email": a.email,
        "parent_account": a.parent_account,
        "body": a.body,
        "counts": {
            "recovery_codes": a.edges.recovery_codes()?.len(),
            "access_keys": a.edges.access_keys()?.len(),
            "identities": a.edges.identities()?.len(),
            "lockers": a.edges.lockers()?.len(),
            "properties": a.edges.properties()?.len(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
