//! Redaction wrapper for values that must never reach a log line
//!
//! The store treats `encrypted_id` / `encrypted_body` as opaque, but they are
//! still ciphertext owned by someone else. `Sensitive` keeps them out of
//! `Debug` and `Display` output.

use std::fmt;

/// Wrapper whose formatting always prints `***REDACTED***`
///
/// ```
/// use lockerstore_core_types::Sensitive;
///
/// let body = Sensitive::new("ciphertext");
/// assert_eq!(format!("{:?}", body), "***REDACTED***");
/// assert_eq!(body.expose(), &"ciphertext");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the wrapped value
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***REDACTED***")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***REDACTED***")
    }
}
