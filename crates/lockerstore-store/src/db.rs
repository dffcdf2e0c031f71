//! Database connection management
//!
//! Opens and configures the SQLite connections handed out by the pool

use crate::config::StoreConfig;
use crate::errors::{from_rusqlite, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::time::Duration;

/// Where connections point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    File(PathBuf),
    /// Shared-cache in-memory database, alive while any connection is open
    Memory(String),
}

impl Target {
    /// A fresh in-memory database private to this process
    pub fn memory() -> Self {
        Target::Memory(format!(
            "file:lockerstore-{}?mode=memory&cache=shared",
            uuid::Uuid::now_v7().simple()
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub target: Target,
    pub busy_timeout: Duration,
    pub wal: bool,
}

impl ConnectOptions {
    pub fn from_config(config: &StoreConfig) -> Self {
        let target = match &config.database.path {
            Some(path) => Target::File(path.clone()),
            None => Target::memory(),
        };
        Self {
            target,
            busy_timeout: config.busy_timeout(),
            wal: config.database.wal,
        }
    }
}

/// Open and configure one connection
pub fn open(options: &ConnectOptions) -> Result<Connection> {
    let conn = match &options.target {
        Target::File(path) => Connection::open(path),
        Target::Memory(uri) => Connection::open_with_flags(uri, OpenFlags::default()),
    }
    .map_err(from_rusqlite)?;
    configure(&conn, options).map_err(from_rusqlite)?;
    Ok(conn)
}

/// Connection manager for the pool; URIs need the default flags
pub(crate) fn manager(options: &ConnectOptions) -> SqliteConnectionManager {
    match &options.target {
        Target::File(path) => SqliteConnectionManager::file(path),
        Target::Memory(uri) => SqliteConnectionManager::file(uri).with_flags(OpenFlags::default()),
    }
}

/// Per-connection settings
///
/// Foreign keys are off by default in SQLite and must be enabled on every
/// connection.
pub fn configure(conn: &Connection, options: &ConnectOptions) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    conn.busy_timeout(options.busy_timeout)?;

    if options.wal && matches!(options.target, Target::File(_)) {
        // journal_mode returns a row, so it cannot go through execute()
        conn.execute_batch("PRAGMA journal_mode = WAL")?;
    }

    Ok(())
}

/// Applies [`configure`] to every connection the pool opens
#[derive(Debug)]
pub(crate) struct Configure(pub(crate) ConnectOptions);

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for Configure {
    fn on_acquire(&self, conn: &mut Connection) -> rusqlite::Result<()> {
        configure(conn, &self.0)
    }
}
