//! lockerstore CLI
//!
//! Administrative commands over a lockerstore database

use clap::{Parser, Subcommand};
use lockerstore_core::logging_facility;
use lockerstore_store::{Client, StoreConfig};
use std::path::PathBuf;

mod commands;

const DEFAULT_DB: &str = "lockerstore.db";

#[derive(Debug, Parser)]
#[command(name = "lockerstore")]
#[command(about = "lockerstore - account, identity and locker persistence", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file; overrides the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate,
    /// Print the generated DDL
    Schema,
    /// Row count per table
    Stats,
    /// DID document operations
    Did(commands::did::DidArgs),
    /// Account operations
    Account(commands::account::AccountArgs),
}

impl Cli {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::load(path)?,
            None => StoreConfig::default().with_env_overrides()?,
        };
        if let Some(db) = &self.db {
            config.database.path = Some(db.clone());
        }
        if config.database.path.is_none() {
            config.database.path = Some(PathBuf::from(DEFAULT_DB));
        }
        Ok(config)
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Schema = cli.command {
        return commands::schema::execute();
    }

    let config = cli.store_config()?;
    logging_facility::init(config.logging_profile()?);
    let client = Client::open(&config)?;
    tracing::debug!(db = ?config.database.path, "store opened");

    match cli.command {
        Commands::Migrate => commands::migrate::execute(&client),
        Commands::Stats => commands::stats::execute(&client),
        Commands::Did(args) => commands::did::execute(&client, args),
        Commands::Account(args) => commands::account::execute(&client, args),
        Commands::Schema => Ok(()),
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
