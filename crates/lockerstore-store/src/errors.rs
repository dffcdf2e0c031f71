//! Error helpers for lockerstore-store
//!
//! Maps SQLite failures onto the shared `StoreError` taxonomy

use lockerstore_core::{Context, StoreError, StoreErrorKind};
use rusqlite::ErrorCode;

pub use lockerstore_core::Result;

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> StoreError {
    StoreError::new(StoreErrorKind::Migration)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> StoreError {
    StoreError::new(StoreErrorKind::Migration)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

/// Translate a rusqlite error
///
/// Unique and foreign-key violations become `Constraint` with the driver's
/// message preserved; interrupts become `Cancelled`.
pub fn from_rusqlite(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::constraint(msg.clone().unwrap_or_else(|| err.to_string()))
        }
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
            StoreError::cancelled()
        }
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
            StoreError::new(StoreErrorKind::Serialization)
                .with_op("sqlite")
                .with_message(err.to_string())
        }
        _ => StoreError::new(StoreErrorKind::Driver)
            .with_op("sqlite")
            .with_message(err.to_string()),
    }
}

/// Like [`from_rusqlite`], but an interrupt reports why the context ended
pub(crate) fn from_rusqlite_in(ctx: &Context, err: rusqlite::Error) -> StoreError {
    let mapped = from_rusqlite(err);
    if mapped.kind() == StoreErrorKind::Cancelled {
        return ctx.err().unwrap_or(mapped);
    }
    mapped
}

pub(crate) fn serialization(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::Serialization).with_message(message)
}

pub(crate) fn internal(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::Internal).with_message(message)
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> StoreError {
    StoreError::new(StoreErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_violation_maps_to_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .map_err(from_rusqlite)
            .unwrap_err();
        assert!(err.is_constraint());
        assert!(err.message().contains("UNIQUE constraint failed"));
    }

    #[test]
    fn test_syntax_error_maps_to_driver() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .execute("SELEC 1", [])
            .map_err(from_rusqlite)
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Driver);
    }

    #[test]
    fn test_checksum_mismatch_is_migration_kind() {
        let err = checksum_mismatch("001_initial_schema", "aa", "bb");
        assert_eq!(err.kind(), StoreErrorKind::Migration);
        assert!(err.message().contains("001_initial_schema"));
    }
}
