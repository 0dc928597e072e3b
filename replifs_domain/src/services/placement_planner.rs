// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Placement Planner
//!
//! Stateless domain service that turns (file size, chunk size, replication
//! factor, active node set) into an ordered chunk plan: one [`ChunkPlan`]
//! per chunk, each with `R` distinct target nodes forming the write
//! pipeline.
//!
//! ## Algorithm
//!
//! With the active nodes sorted by descending free space, chunk `i` gets
//! targets `N[(i·R + j) mod |N|]` for `j ∈ [0, R)`. The rotation spreads
//! consecutive chunks across the fleet while the sort biases the emptiest
//! nodes to the front of each pipeline. When the rotation would select the
//! same node twice for one chunk (possible only if the input carries
//! duplicate node ids) the duplicate is skipped and the cycle continues.
//!
//! ## Guarantees and Non-guarantees
//!
//! - Every chunk receives exactly `R` *distinct* targets whenever the input
//!   contains at least `R` distinct node ids; otherwise planning fails with
//!   `InsufficientNodes`.
//! - A zero-byte file plans to zero chunks.
//! - The planner reserves no capacity and keeps no state. Over-commitment
//!   is tolerated; the reconciler repairs placement violations after the
//!   fact.

use crate::entities::{ChunkEntry, NodeInfo};
use crate::value_objects::{ChunkId, ChunkSize};
use crate::DfsError;

/// One target node of a chunk pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTarget {
    pub node_id: String,
    pub url: String,
}

/// Placement decision for one chunk: identity, position, size, and the
/// ordered pipeline of target nodes (head first).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub chunk_id: ChunkId,
    pub seq_index: u64,
    pub size: u64,
    pub targets: Vec<PlannedTarget>,
}

impl ChunkPlan {
    /// The planned chunk as a metadata entry (no replicas until commit).
    pub fn to_entry(&self) -> ChunkEntry {
        ChunkEntry::planned(self.chunk_id, self.seq_index, self.size)
    }
}

/// Plans chunking and placement for a new file.
///
/// `active_nodes` is the current active node set; it is re-sorted here by
/// descending free space (node id as tie-break) so callers need not
/// guarantee ordering.
///
/// # Errors
/// `DfsError::InsufficientNodes` when fewer than `replication_factor`
/// distinct nodes are available. `DfsError::ConfigurationFailure` when the
/// replication factor is zero.
pub fn plan_placement(
    file_size: u64,
    chunk_size: ChunkSize,
    replication_factor: usize,
    active_nodes: &[NodeInfo],
) -> Result<Vec<ChunkPlan>, DfsError> {
    if replication_factor == 0 {
        return Err(DfsError::ConfigurationFailure(
            "replication factor must be at least 1".to_string(),
        ));
    }

    let mut nodes: Vec<&NodeInfo> = active_nodes.iter().collect();
    nodes.sort_by(|a, b| {
        b.free_space
            .cmp(&a.free_space)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });

    let distinct = {
        let mut ids: Vec<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    };
    if distinct < replication_factor {
        return Err(DfsError::InsufficientNodes(format!(
            "{} active node(s), replication factor {}",
            distinct, replication_factor
        )));
    }

    let chunk_count = chunk_size.chunks_needed(file_size);
    let mut plans = Vec::with_capacity(chunk_count as usize);

    for i in 0..chunk_count {
        let mut targets: Vec<PlannedTarget> = Vec::with_capacity(replication_factor);
        let mut offset = 0usize;
        // Walk the rotation until R distinct nodes are collected. Bounded by
        // the node count: after |N| steps every entry has been visited once.
        while targets.len() < replication_factor && offset < nodes.len() {
            let idx = ((i as usize) * replication_factor + offset) % nodes.len();
            let node = nodes[idx];
            offset += 1;
            if targets.iter().any(|t| t.node_id == node.node_id) {
                continue;
            }
            targets.push(PlannedTarget {
                node_id: node.node_id.clone(),
                url: node.url(),
            });
        }
        debug_assert_eq!(targets.len(), replication_factor);

        plans.push(ChunkPlan {
            chunk_id: ChunkId::new(),
            seq_index: i,
            size: chunk_size.size_of_chunk(file_size, i),
            targets,
        });
    }

    Ok(plans)
}
