//! Canonical logging macros
//!
//! Mutation terminals own lifecycle logging: one start event, then exactly
//! one end or end_error event carrying `duration_ms`.

/// Log the start of an operation
///
/// ```
/// # use lockerstore_core::log_op_start;
/// log_op_start!("account.create");
/// log_op_start!("account.create", entity = "account");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// ```
/// # use lockerstore_core::log_op_end;
/// log_op_end!("account.create", duration_ms = 3);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation failure with its error kind and code
///
/// ```
/// # use lockerstore_core::{log_op_error, StoreError};
/// let err = StoreError::not_found("account");
/// log_op_error!("account.update_one", err, duration_ms = 1);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let store_err: &$crate::errors::StoreError = &$err;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?store_err.kind(),
            err.code = store_err.code(),
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let store_err: &$crate::errors::StoreError = &$err;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?store_err.kind(),
            err.code = store_err.code(),
            $($field)*
        );
    }};
}
