//! Structured logging facility for lockerstore
//!
//! - Single initialization point via `init(profile)`
//! - Boundary macros (`log_op_start!`, `log_op_end!`, `log_op_error!`) used
//!   by mutation terminals; lower layers only emit `tracing::debug!`
//! - Test capture mode for deterministic assertions
//!
//! ```rust
//! use lockerstore_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
