//! lockerstore store - typed persistence for accounts, identities and lockers
//!
//! Provides:
//! - Schema descriptors driving DDL, migrations and column validation
//! - An r2d2 connection pool and a driver that honours cancellation and deadlines
//! - Typed repositories, predicates, query builders with eager loading
//! - Mutation builders with hooks and query interceptors
//! - Client and Transaction handles
//!
//! ```no_run
//! use lockerstore_core::Context;
//! use lockerstore_store::{account, Client};
//!
//! # fn main() -> lockerstore_store::Result<()> {
//! let ctx = Context::background();
//! let client = Client::open_in_memory()?;
//! client.migrate(&ctx)?;
//!
//! let a = client
//!     .account()
//!     .create()
//!     .set_did("did:example:a")
//!     .set_state("active")
//!     .set_body(serde_json::json!({}))
//!     .save(&ctx)?;
//! let found = client
//!     .account()
//!     .query()
//!     .filter(account::DID.eq("did:example:a"))
//!     .only(&ctx)?;
//! assert_eq!(found.id, a.id);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod db;
pub mod driver;
mod eager;
pub mod entity;
pub mod errors;
mod executor;
pub mod hook;
pub mod migrations;
pub mod mutation;
pub mod pool;
pub mod predicate;
pub mod query;
pub mod record;
pub mod repository;
pub mod schema;
mod sql;

// Re-export key types
pub use client::{Client, Transaction};
pub use config::{ConfigError, StoreConfig};
pub use driver::TxState;
pub use entity::{
    access_key, account, did, identity, locker, property, recovery_code, AccessKey, Account,
    AccountEdges, Did, Entity, Identity, Locker, OwnerEdge, Property, RecoveryCode,
};
pub use errors::Result;
pub use hook::{Hook, Interceptor, Mutator, Querier};
pub use mutation::{Mutation, MutationOutput, MutationState, Op};
pub use predicate::{Field, Predicate};
pub use query::{Aggregate, Order, Query};
pub use repository::Repository;
