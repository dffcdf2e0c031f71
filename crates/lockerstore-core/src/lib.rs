//! lockerstore core - error taxonomy, context and logging facility
//!
//! This crate holds the pieces every layer of the store shares:
//! - `StoreError` / `StoreErrorKind`, the structured error returned by all
//!   repository, query and mutation operations
//! - `Context`, the cancellation-aware handle threaded through every
//!   database round-trip
//! - the logging facility (`init(profile)`, `log_op_*` macros, test capture)

pub mod context;
pub mod errors;
pub mod logging_facility;

pub use context::{CancelHandle, Context};
pub use errors::{Result, StoreError, StoreErrorKind};

#[doc(hidden)]
pub use lockerstore_core_types as __types;
