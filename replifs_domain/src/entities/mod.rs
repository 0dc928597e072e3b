// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain entities: objects with identity whose state evolves over time.

pub mod file_metadata;
pub mod lease;
pub mod node_info;

pub use file_metadata::{
    ChunkCommit, ChunkEntry, FileMetadata, InventorySyncOutcome, ReplicaInfo, ReplicaState,
};
pub use lease::{Lease, LeaseOperation};
pub use node_info::{HeartbeatSample, NodeInfo, NodeRegistration, NodeState};
