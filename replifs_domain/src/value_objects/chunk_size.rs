// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Chunk Size Value Object
//!
//! Validated size of the fixed-width slices a file's byte stream is split
//! into. Every chunk of a file has this size except possibly the last one.
//!
//! ## Validation Rules
//!
//! - Minimum: 1 byte (a zero chunk size would make the planner divide by
//!   zero)
//! - Maximum: 1 GiB (a pipeline hop buffers one compressed chunk in memory;
//!   the cap bounds that buffer)
//! - Default: 64 MiB
//!
//! ## Usage
//!
//! The planner uses [`ChunkSize::chunks_needed`] and
//! [`ChunkSize::size_of_chunk`] to derive the chunk plan; the upload
//! coordinator validates client-supplied sizes through [`ChunkSize::new`].

use serde::{Deserialize, Serialize};

use crate::DfsError;

/// Validated chunk size in bytes.
///
/// This is a Value Object: immutable, compared by value, self-validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkSize {
    bytes: u64,
}

impl ChunkSize {
    /// Minimum chunk size in bytes.
    pub const MIN_SIZE: u64 = 1;

    /// Maximum chunk size in bytes (1 GiB).
    pub const MAX_SIZE: u64 = 1024 * 1024 * 1024;

    /// Default chunk size in bytes (64 MiB).
    pub const DEFAULT_SIZE: u64 = 64 * 1024 * 1024;

    /// Creates a validated chunk size.
    ///
    /// # Errors
    /// Returns `DfsError::ConfigurationFailure` when `bytes` is outside
    /// `[MIN_SIZE, MAX_SIZE]`.
    pub fn new(bytes: u64) -> Result<Self, DfsError> {
        if bytes < Self::MIN_SIZE {
            return Err(DfsError::ConfigurationFailure(format!(
                "chunk size must be at least {} byte, got {}",
                Self::MIN_SIZE,
                bytes
            )));
        }
        if bytes > Self::MAX_SIZE {
            return Err(DfsError::ConfigurationFailure(format!(
                "chunk size must be at most {} bytes, got {}",
                Self::MAX_SIZE,
                bytes
            )));
        }
        Ok(Self { bytes })
    }

    /// Creates a chunk size from mebibytes.
    pub fn from_mib(mib: u64) -> Result<Self, DfsError> {
        Self::new(mib * 1024 * 1024)
    }

    /// Size in bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Number of chunks a file of `file_size` bytes splits into.
    ///
    /// Zero-byte files need zero chunks.
    pub fn chunks_needed(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.bytes)
    }

    /// Size of chunk `index` within a file of `file_size` bytes: the full
    /// chunk size for every chunk except possibly the last.
    pub fn size_of_chunk(&self, file_size: u64, index: u64) -> u64 {
        debug_assert!(index < self.chunks_needed(file_size).max(1));
        std::cmp::min(self.bytes, file_size - index * self.bytes)
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self {
            bytes: Self::DEFAULT_SIZE,
        }
    }
}

impl std::fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.bytes % (1024 * 1024) == 0 {
            write!(f, "{} MiB", self.bytes / (1024 * 1024))
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}
