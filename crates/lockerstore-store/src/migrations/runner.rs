//! Migration runner
//!
//! Applies migrations with checksums and idempotency. Each migration runs in
//! its own transaction together with its `schema_version` row.

use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use crate::migrations::checksums::compute_checksum;
use crate::migrations::embedded::{get_migrations, Migration};
use rusqlite::{Connection, OptionalExtension};

/// Apply all pending migrations to the database
///
/// # Errors
///
/// Migration when a migration body fails, or when a previously applied
/// migration's recorded checksum no longer matches its body.
pub fn apply_migrations(conn: &Connection) -> Result<usize> {
    create_schema_version_table(conn)?;

    let mut applied = 0;
    for migration in get_migrations() {
        if apply_migration(conn, &migration)? {
            applied += 1;
        }
    }
    tracing::debug!(applied, "migrations complete");
    Ok(applied)
}

/// Ids of the migrations recorded as applied, in application order
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    create_schema_version_table(conn)?;
    let mut stmt = conn
        .prepare("SELECT migration_id FROM schema_version ORDER BY id")
        .map_err(from_rusqlite)?;
    let ids = stmt
        .query_map([], |row| row.get(0))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(from_rusqlite)?;
    Ok(ids)
}

fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            migration_id TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL,
            checksum TEXT
        )",
        [],
    )
    .map_err(from_rusqlite)?;

    Ok(())
}

/// Apply one migration; returns false when it was already recorded
fn apply_migration(conn: &Connection, migration: &Migration) -> Result<bool> {
    let checksum = compute_checksum(&migration.sql);

    let recorded: Option<Option<String>> = conn
        .query_row(
            "SELECT checksum FROM schema_version WHERE migration_id = ?",
            [migration.id],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)?;

    match recorded {
        Some(Some(existing)) if existing != checksum => {
            return Err(checksum_mismatch(migration.id, &existing, &checksum));
        }
        Some(_) => return Ok(false),
        None => {}
    }

    let tx = conn.unchecked_transaction().map_err(from_rusqlite)?;

    tx.execute_batch(&migration.sql)
        .map_err(|e| migration_error(migration.id, &e.to_string()))?;

    let now = chrono::Utc::now().timestamp_millis();
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?, ?, ?)",
        rusqlite::params![migration.id, now, checksum],
    )
    .map_err(from_rusqlite)?;

    tx.commit().map_err(from_rusqlite)?;
    tracing::debug!(migration_id = migration.id, "migration applied");

    Ok(true)
}
