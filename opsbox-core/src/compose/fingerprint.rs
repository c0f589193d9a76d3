//! Content fingerprint of a compose definition.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex length of the short form used in instance names and labels.
pub const SHORT_LEN: usize = 12;

/// SHA-256 of a compose definition's raw bytes, lowercase hex.
///
/// Identical bytes always produce the same fingerprint, so an `up` and a
/// later `down` of an unchanged file address the same state record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComposeFingerprint(String);

impl ComposeFingerprint {
    pub fn of(raw: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(raw)))
    }

    /// Full 64-character hex digest.
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Leading characters of the digest, unique enough to tag instances.
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN]
    }
}

impl fmt::Display for ComposeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
