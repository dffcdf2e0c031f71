//! Apply pending migrations

use lockerstore_core::Context;
use lockerstore_store::Client;

pub fn execute(client: &Client) -> anyhow::Result<()> {
    let applied = client.migrate(&Context::background())?;
    println!("Applied {} migration(s)", applied);
    Ok(())
}
