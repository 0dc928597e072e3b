// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Replifs Domain
//!
//! The domain layer of the replifs distributed file store: the business
//! rules of chunked, replicated storage, independent of databases, HTTP, or
//! the async runtime.
//!
//! ## Module Structure
//!
//! - [`entities`]: objects with identity: [`FileMetadata`] (a file and its
//!   ordered chunk list, each chunk owning its replica list),
//!   [`entities::NodeInfo`] (a storage node row), [`entities::Lease`]
//!   (a time-bounded exclusive claim on a path)
//! - [`value_objects`]: immutable, self-validating values: typed ids,
//!   [`ChunkSize`], [`value_objects::VirtualPath`]
//! - [`services`]: stateless domain services: the placement planner and
//!   the SHA-256 integrity helpers
//! - [`repositories`]: the [`MetadataStore`] port implemented by the
//!   infrastructure layer
//! - [`error`]: the [`DfsError`] failure-kind enum shared by all layers
//!
//! ## Key Invariants
//!
//! - A file's chunks carry contiguous `seq_index` values starting at zero
//!   and their sizes sum to the file size
//! - At most one live lease exists per path at any instant
//! - A replica counts only while it is committed *and* backed by the owning
//!   node's most recent heartbeat inventory; the heartbeat is the single
//!   source of truth for placement, and the replica sync removes anything
//!   a heartbeat stops reporting
//! - The planner hands every chunk exactly `R` distinct target nodes or
//!   fails; it never reserves capacity
//!
//! ## Architecture Note
//!
//! Domain services are synchronous (placement and hashing are CPU-bound);
//! only the repository port is `async`, because every implementation of it
//! performs I/O.

pub mod entities;
pub mod error;
pub mod repositories;
pub mod services;
pub mod value_objects;

// Re-export the vocabulary types at the crate root.
pub use entities::{
    ChunkCommit, ChunkEntry, FileMetadata, HeartbeatSample, InventorySyncOutcome, Lease,
    LeaseOperation, NodeInfo, NodeRegistration, NodeState, ReplicaInfo, ReplicaState,
};
pub use error::DfsError;
pub use repositories::{HeartbeatSyncReport, MetadataStore, SystemStats};
pub use value_objects::{ChunkId, ChunkSize, FileId, LeaseId, VirtualPath};
