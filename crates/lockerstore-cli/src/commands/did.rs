//! DID document lookup

use anyhow::Context as _;
use clap::{Args, Subcommand};
use lockerstore_core::Context;
use lockerstore_store::{did, Client};

#[derive(Debug, Args)]
pub struct DidArgs {
    #[command(subcommand)]
    pub command: DidCommand,
}

#[derive(Debug, Subcommand)]
pub enum DidCommand {
    /// Print the document body stored for a DID
    Get { did: String },
}

pub fn execute(client: &Client, args: DidArgs) -> anyhow::Result<()> {
    match args.command {
        DidCommand::Get { did } => get(client, &did),
    }
}

fn get(client: &Client, id: &str) -> anyhow::Result<()> {
    let doc = client
        .did()
        .query()
        .filter(did::DID.eq(id))
        .only(&Context::background())
        .with_context(|| format!("looking up DID document {}", id))?;
    println!("{}", serde_json::to_string_pretty(&doc.body)?);
    Ok(())
}
