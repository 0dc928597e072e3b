// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Chunk Integrity
//!
//! SHA-256 helpers used for the chunk durability contract: the checksum is
//! always computed over the *uncompressed* bytes, recorded beside the chunk
//! on disk and in file metadata, and re-verified on every read. A mismatch
//! is fatal for that replica and is never silently corrected.

use sha2::{Digest, Sha256};

use crate::DfsError;

/// SHA-256 of `data`, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies `data` against an expected lowercase-hex SHA-256.
///
/// # Errors
/// `DfsError::Corrupted` carrying both digests on mismatch.
pub fn verify_sha256(data: &[u8], expected_hex: &str, context: &str) -> Result<(), DfsError> {
    let actual = sha256_hex(data);
    if actual != expected_hex {
        return Err(DfsError::Corrupted(format!(
            "{}: checksum mismatch (expected {}, computed {})",
            context, expected_hex, actual
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_accepts_matching_digest() {
        let data = b"replifs";
        verify_sha256(data, &sha256_hex(data), "test").unwrap();
    }

    #[test]
    fn test_verify_rejects_mismatch() {
        let err = verify_sha256(b"replifs", &"0".repeat(64), "chunk 7").unwrap_err();
        assert!(matches!(err, DfsError::Corrupted(_)));
        assert!(err.to_string().contains("chunk 7"));
    }
}
