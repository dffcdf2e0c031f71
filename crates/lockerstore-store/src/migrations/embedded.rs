//! Migrations shipped with the store
//!
//! The initial schema is generated from the table descriptors, so the DDL
//! and the runtime column validation can never drift apart.

use crate::schema;

/// A versioned migration body
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: &'static str,
    pub sql: String,
}

/// All migrations, in application order
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        id: "001_initial_schema",
        sql: schema::ddl(),
    }]
}
