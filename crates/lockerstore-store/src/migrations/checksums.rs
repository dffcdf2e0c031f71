//! Migration body checksums

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a migration body
pub fn compute_checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}
