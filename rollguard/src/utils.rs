//! Digest helpers

use std::fmt::Write;

use sha2::{Digest, Sha256};

/// Lowercase hex of a finished SHA256 hasher, the format `sha256sum` prints
pub fn sha256_finish(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{:02x}", byte);
            out
        })
}
