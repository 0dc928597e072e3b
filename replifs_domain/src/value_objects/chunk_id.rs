// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Chunk Identifier
//!
//! Type-safe identifier for one chunk of a file's byte stream. Chunk ids name
//! on-disk artifacts (`{chunk_id}.chunk` / `{chunk_id}.checksum`) as well as
//! metadata rows, so the string form must be stable and filesystem-safe -
//! both properties hold for the hyphenated lowercase UUID rendering used
//! here.
//!
//! ## Design
//!
//! - **Opaque**: 128-bit UUID v4; no embedded meaning
//! - **Value semantics**: compared by value, hashable, orderable
//! - **Serde transparent**: serializes as the plain UUID string so wire and
//!   database representations stay human-readable

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DfsError;

/// Identifier of a single chunk.
///
/// The same id refers to the chunk in file metadata, in heartbeat
/// inventories, and in storage node filenames. A chunk id is allocated once
/// by the placement planner and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(Uuid);

impl ChunkId {
    /// Allocates a fresh random chunk id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID (database round-trips, tests).
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses the hyphenated string form.
    ///
    /// This is also the grammar used to recognize chunk files during an
    /// inventory scan: a filename stem that does not parse is not a chunk.
    pub fn parse(s: &str) -> Result<Self, DfsError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DfsError::SerializationFailure(format!("invalid chunk id '{}': {}", s, e)))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ChunkId {
    type Err = DfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
