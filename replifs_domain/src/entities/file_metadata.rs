// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Metadata Entity
//!
//! This module provides the `FileMetadata` aggregate: one file row in the
//! metadata store, owning its ordered list of [`ChunkEntry`] values, each of
//! which exclusively owns its [`ReplicaInfo`] list.
//!
//! ## Invariants
//!
//! - The chunk list is ordered by `seq_index`, which forms `[0, n)`
//! - The chunk sizes sum to `size`
//! - After a successful commit every chunk has at least one committed
//!   replica; the reconciler drives the count toward the replication factor
//! - A replica is *authoritative* only when its state is committed **and**
//!   the owning node's most recent heartbeat included the chunk; the
//!   heartbeat diff in [`FileMetadata::sync_node_inventory`] enforces the
//!   second half by construction, because replicas a heartbeat omits are
//!   removed rather than demoted
//!
//! ## Mutation Discipline
//!
//! All mutations of a file row flow through methods on this type
//! (`apply_commit`, `sync_node_inventory`, `mark_deleted`). The metadata
//! store implementations read the row, call one method, and write the result
//! back under their row lock; no SQL-side JSON surgery. That keeps the two
//! database backends byte-compatible on `chunks_json`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ChunkId, FileId, VirtualPath};
use crate::DfsError;

/// Lifecycle state of one stored copy of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaState {
    /// Planned or in-flight; not yet confirmed durable.
    Pending,
    /// Confirmed durable on the node.
    Committed,
    /// Failed checksum verification; unusable but kept visible.
    Corrupted,
    /// Scheduled for removal.
    Deleted,
}

/// One stored copy of a chunk on one storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub node_id: String,
    pub url: String,
    pub state: ReplicaState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checksum_verified: bool,
}

impl ReplicaInfo {
    /// A committed replica as recorded from a heartbeat or a commit report.
    pub fn committed(node_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            url: url.into(),
            state: ReplicaState::Committed,
            last_heartbeat: None,
            checksum_verified: false,
        }
    }
}

/// One chunk of a file: identity, position, size, integrity, and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub chunk_id: ChunkId,
    pub seq_index: u64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub replicas: Vec<ReplicaInfo>,
}

impl ChunkEntry {
    /// A freshly planned chunk: no checksum, no replicas yet.
    pub fn planned(chunk_id: ChunkId, seq_index: u64, size: u64) -> Self {
        Self {
            chunk_id,
            seq_index,
            size,
            checksum: None,
            replicas: Vec::new(),
        }
    }

    /// Replicas in committed state.
    pub fn committed_replicas(&self) -> impl Iterator<Item = &ReplicaInfo> {
        self.replicas.iter().filter(|r| r.state == ReplicaState::Committed)
    }

    /// Replicas that are committed *and* live on a currently active node.
    /// The heartbeat-inventory condition is already folded in by
    /// [`FileMetadata::sync_node_inventory`], so this is a plain set
    /// intersection.
    pub fn healthy_replicas<'a>(&'a self, active_node_ids: &'a HashSet<String>) -> Vec<&'a ReplicaInfo> {
        self.committed_replicas()
            .filter(|r| active_node_ids.contains(&r.node_id))
            .collect()
    }
}

/// What a client reports for one chunk at commit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkCommit {
    pub chunk_id: ChunkId,
    /// SHA-256 over the uncompressed chunk bytes, lowercase hex.
    pub checksum: String,
    /// Node ids that confirmed durable storage during the pipeline write.
    pub nodes: Vec<String>,
}

/// Result of applying a heartbeat inventory diff to one file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InventorySyncOutcome {
    pub replicas_added: usize,
    pub replicas_removed: usize,
    pub replicas_updated: usize,
}

impl InventorySyncOutcome {
    /// True when the file row changed and must be written back.
    pub fn changed(&self) -> bool {
        self.replicas_added > 0 || self.replicas_removed > 0 || self.replicas_updated > 0
    }
}

/// One file: identity, name, size, lifecycle, and its ordered chunk list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_id: FileId,
    pub path: VirtualPath,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub chunks: Vec<ChunkEntry>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileMetadata {
    /// Creates a file in the planned state: chunk entries present, replica
    /// lists empty, awaiting commit.
    pub fn planned(path: VirtualPath, size: u64, chunks: Vec<ChunkEntry>, now: DateTime<Utc>) -> Self {
        Self {
            file_id: FileId::new(),
            path,
            size,
            created_at: now,
            modified_at: now,
            chunks,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Checks the structural invariants: contiguous `seq_index` from zero
    /// and chunk sizes summing to the file size.
    pub fn validate(&self) -> Result<(), DfsError> {
        let mut total = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.seq_index != i as u64 {
                return Err(DfsError::MetadataFailure(format!(
                    "file {}: chunk {} has seq_index {}, expected {}",
                    self.file_id, chunk.chunk_id, chunk.seq_index, i
                )));
            }
            total += chunk.size;
        }
        if total != self.size {
            return Err(DfsError::MetadataFailure(format!(
                "file {}: chunk sizes sum to {} but file size is {}",
                self.file_id, total, self.size
            )));
        }
        Ok(())
    }

    /// Applies a client commit report to the planned chunk list.
    ///
    /// Every planned chunk must be reported exactly once and no unknown
    /// chunk may appear; otherwise the commit is rejected as a plan
    /// mismatch. For each reported chunk the checksum is recorded and the
    /// replica list is rebuilt from the confirmed node ids, resolving each
    /// node's current URL through `resolve_url` (nodes the metadata service
    /// has never seen keep an empty URL until their first heartbeat).
    ///
    /// Under-replication (`|nodes| < replication factor`) is accepted; the
    /// caller logs the warning and the reconciler restores the factor.
    pub fn apply_commit(
        &mut self,
        commits: &[ChunkCommit],
        now: DateTime<Utc>,
        mut resolve_url: impl FnMut(&str) -> Option<String>,
    ) -> Result<(), DfsError> {
        let planned: HashSet<ChunkId> = self.chunks.iter().map(|c| c.chunk_id).collect();
        let reported: HashSet<ChunkId> = commits.iter().map(|c| c.chunk_id).collect();

        if reported.len() != commits.len() {
            return Err(DfsError::InvalidRequest(format!(
                "commit for file {} reports duplicate chunks",
                self.file_id
            )));
        }
        if let Some(unknown) = reported.difference(&planned).next() {
            return Err(DfsError::InvalidRequest(format!(
                "commit for file {} references unknown chunk {}",
                self.file_id, unknown
            )));
        }
        if let Some(missing) = planned.difference(&reported).next() {
            return Err(DfsError::InvalidRequest(format!(
                "commit for file {} omits planned chunk {}",
                self.file_id, missing
            )));
        }

        for commit in commits {
            let entry = self
                .chunks
                .iter_mut()
                .find(|c| c.chunk_id == commit.chunk_id)
                .ok_or_else(|| {
                    DfsError::Internal(format!("chunk {} vanished between plan checks", commit.chunk_id))
                })?;

            entry.checksum = Some(commit.checksum.clone());
            entry.replicas = commit
                .nodes
                .iter()
                .map(|node_id| ReplicaInfo {
                    node_id: node_id.clone(),
                    url: resolve_url(node_id).unwrap_or_default(),
                    state: ReplicaState::Committed,
                    last_heartbeat: Some(now),
                    checksum_verified: true,
                })
                .collect();
        }

        self.modified_at = now;
        Ok(())
    }

    /// Applies one node's heartbeat inventory to this file's replica lists.
    ///
    /// The inventory is the single source of truth for what the node holds:
    ///
    /// - chunk present in the inventory → ensure a committed replica for
    ///   the node exists and points at its current URL
    /// - chunk absent from the inventory → remove any replica for the node
    ///   (reported by the caller as a potential data-loss event)
    ///
    /// Chunks of this file the node reports but the file does not know are
    /// ignored here; they belong to other files or to garbage.
    pub fn sync_node_inventory(
        &mut self,
        node_id: &str,
        node_url: &str,
        inventory: &HashSet<ChunkId>,
        now: DateTime<Utc>,
    ) -> InventorySyncOutcome {
        let mut outcome = InventorySyncOutcome::default();

        for chunk in &mut self.chunks {
            if inventory.contains(&chunk.chunk_id) {
                match chunk.replicas.iter_mut().find(|r| r.node_id == node_id) {
                    Some(replica) => {
                        let mut touched = false;
                        if replica.state != ReplicaState::Committed {
                            replica.state = ReplicaState::Committed;
                            touched = true;
                        }
                        if replica.url != node_url {
                            replica.url = node_url.to_string();
                            touched = true;
                        }
                        replica.last_heartbeat = Some(now);
                        if touched {
                            outcome.replicas_updated += 1;
                        }
                    }
                    None => {
                        chunk.replicas.push(ReplicaInfo {
                            node_id: node_id.to_string(),
                            url: node_url.to_string(),
                            state: ReplicaState::Committed,
                            last_heartbeat: Some(now),
                            checksum_verified: false,
                        });
                        outcome.replicas_added += 1;
                    }
                }
            } else {
                let before = chunk.replicas.len();
                chunk.replicas.retain(|r| r.node_id != node_id);
                outcome.replicas_removed += before - chunk.replicas.len();
            }
        }

        if outcome.changed() {
            self.modified_at = now;
        }
        outcome
    }

    /// Marks the file soft-deleted. The row stays; listings exclude it.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.modified_at = now;
    }

    /// All chunk ids of this file, in sequence order.
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.chunks.iter().map(|c| c.chunk_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned_file(sizes: &[u64]) -> FileMetadata {
        let now = Utc::now();
        let chunks = sizes
            .iter()
            .enumerate()
            .map(|(i, &s)| ChunkEntry::planned(ChunkId::new(), i as u64, s))
            .collect();
        FileMetadata::planned(
            VirtualPath::parse("/test/file.bin").unwrap(),
            sizes.iter().sum(),
            chunks,
            now,
        )
    }

    #[test]
    fn test_validate_accepts_well_formed_file() {
        let file = planned_file(&[64, 64, 8]);
        file.validate().unwrap();
    }

    #[test]
    fn test_validate_accepts_empty_file() {
        let file = planned_file(&[]);
        file.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_size_mismatch() {
        let mut file = planned_file(&[64, 64]);
        file.size += 1;
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_broken_sequence() {
        let mut file = planned_file(&[64, 64]);
        file.chunks[1].seq_index = 5;
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_apply_commit_installs_checksums_and_replicas() {
        let mut file = planned_file(&[10, 10]);
        let commits: Vec<ChunkCommit> = file
            .chunks
            .iter()
            .map(|c| ChunkCommit {
                chunk_id: c.chunk_id,
                checksum: "ab".repeat(32),
                nodes: vec!["node-a".into(), "node-b".into()],
            })
            .collect();

        file.apply_commit(&commits, Utc::now(), |id| Some(format!("http://{}:8001", id)))
            .unwrap();

        for chunk in &file.chunks {
            assert_eq!(chunk.checksum.as_deref(), Some("ab".repeat(32).as_str()));
            assert_eq!(chunk.replicas.len(), 2);
            assert!(chunk.replicas.iter().all(|r| r.state == ReplicaState::Committed));
            assert_eq!(chunk.replicas[0].url, "http://node-a:8001");
        }
    }

    #[test]
    fn test_apply_commit_rejects_unknown_chunk() {
        let mut file = planned_file(&[10]);
        let mut commits = vec![ChunkCommit {
            chunk_id: file.chunks[0].chunk_id,
            checksum: "00".repeat(32),
            nodes: vec!["node-a".into()],
        }];
        commits.push(ChunkCommit {
            chunk_id: ChunkId::new(),
            checksum: "11".repeat(32),
            nodes: vec!["node-a".into()],
        });
        assert!(file.apply_commit(&commits, Utc::now(), |_| None).is_err());
    }

    #[test]
    fn test_apply_commit_rejects_omitted_chunk() {
        let mut file = planned_file(&[10, 10]);
        let commits = vec![ChunkCommit {
            chunk_id: file.chunks[0].chunk_id,
            checksum: "00".repeat(32),
            nodes: vec!["node-a".into()],
        }];
        assert!(file.apply_commit(&commits, Utc::now(), |_| None).is_err());
    }

    #[test]
    fn test_apply_commit_accepts_empty_plan() {
        let mut file = planned_file(&[]);
        file.apply_commit(&[], Utc::now(), |_| None).unwrap();
    }

    #[test]
    fn test_sync_adds_replica_reported_by_heartbeat() {
        let mut file = planned_file(&[10]);
        let chunk_id = file.chunks[0].chunk_id;
        let inventory: HashSet<ChunkId> = [chunk_id].into_iter().collect();

        let outcome = file.sync_node_inventory("node-a", "http://a:8001", &inventory, Utc::now());

        assert_eq!(outcome.replicas_added, 1);
        assert_eq!(file.chunks[0].replicas.len(), 1);
        assert_eq!(file.chunks[0].replicas[0].state, ReplicaState::Committed);
    }

    #[test]
    fn test_sync_removes_replica_omitted_by_heartbeat() {
        let mut file = planned_file(&[10]);
        file.chunks[0]
            .replicas
            .push(ReplicaInfo::committed("node-a", "http://a:8001"));

        let outcome = file.sync_node_inventory("node-a", "http://a:8001", &HashSet::new(), Utc::now());

        assert_eq!(outcome.replicas_removed, 1);
        assert!(file.chunks[0].replicas.is_empty());
    }

    #[test]
    fn test_sync_updates_stale_url_and_state() {
        let mut file = planned_file(&[10]);
        let chunk_id = file.chunks[0].chunk_id;
        file.chunks[0].replicas.push(ReplicaInfo {
            node_id: "node-a".into(),
            url: "http://old:8001".into(),
            state: ReplicaState::Pending,
            last_heartbeat: None,
            checksum_verified: false,
        });
        let inventory: HashSet<ChunkId> = [chunk_id].into_iter().collect();

        let outcome = file.sync_node_inventory("node-a", "http://new:8001", &inventory, Utc::now());

        assert_eq!(outcome.replicas_updated, 1);
        let replica = &file.chunks[0].replicas[0];
        assert_eq!(replica.url, "http://new:8001");
        assert_eq!(replica.state, ReplicaState::Committed);
    }

    #[test]
    fn test_sync_leaves_other_nodes_untouched() {
        let mut file = planned_file(&[10]);
        file.chunks[0]
            .replicas
            .push(ReplicaInfo::committed("node-b", "http://b:8001"));

        let outcome = file.sync_node_inventory("node-a", "http://a:8001", &HashSet::new(), Utc::now());

        assert!(!outcome.changed());
        assert_eq!(file.chunks[0].replicas.len(), 1);
    }

    #[test]
    fn test_healthy_replicas_intersects_active_nodes() {
        let mut file = planned_file(&[10]);
        file.chunks[0]
            .replicas
            .push(ReplicaInfo::committed("node-a", "http://a:8001"));
        file.chunks[0]
            .replicas
            .push(ReplicaInfo::committed("node-b", "http://b:8001"));

        let active: HashSet<String> = ["node-a".to_string()].into_iter().collect();
        let healthy = file.chunks[0].healthy_replicas(&active);
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].node_id, "node-a");
    }

    #[test]
    fn test_chunks_json_round_trip() {
        let mut file = planned_file(&[10, 20]);
        file.chunks[0]
            .replicas
            .push(ReplicaInfo::committed("node-a", "http://a:8001"));
        let json = serde_json::to_string(&file.chunks).unwrap();
        let back: Vec<ChunkEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, file.chunks);
    }
}
