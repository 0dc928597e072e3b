// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metadata Store Port
//!
//! Repository interface over the metadata service's persistent state: the
//! `files`, `nodes`, and `leases` tables. Infrastructure provides a SQLite
//! and a PostgreSQL implementation behind this trait; the application layer
//! never sees SQL.
//!
//! ## Consistency Contract
//!
//! - The metadata service is the single writer. Implementations serialize
//!   row mutations internally (a process-wide writer lock is acceptable)
//!   and hold that lock only around the row update; never across network
//!   I/O.
//! - `insert_file` is atomic insert-if-absent on the path uniqueness
//!   constraint and surfaces collisions as `Conflict`.
//! - `commit_file` and `apply_heartbeat` are read-modify-write operations
//!   executed entirely under the writer lock; the row transformations
//!   themselves live on [`FileMetadata`] so both backends share one
//!   behavior.
//! - Readers observe linearizable per-row state. Cross-file transactions
//!   are not offered.
//!
//! ## Architecture Note
//!
//! This trait is an infrastructure *port*: it stays `async` because every
//! implementation is I/O-bound, unlike the pure domain services.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{
    ChunkCommit, FileMetadata, HeartbeatSample, Lease, LeaseOperation, NodeInfo,
};
use crate::value_objects::{FileId, LeaseId, VirtualPath};
use crate::DfsError;

/// Outcome of folding one heartbeat into the metadata.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatSyncReport {
    /// True when this heartbeat created the node row (first contact).
    pub node_created: bool,
    /// Nodes transitioned to inactive because their heartbeat went stale.
    pub nodes_marked_inactive: u64,
    /// File rows rewritten by the replica sync.
    pub files_updated: u64,
    /// Replicas upserted because the node reported the chunk.
    pub replicas_added: u64,
    /// Replicas removed because the node's inventory omitted the chunk.
    /// Every removal is a potential data-loss event.
    pub replicas_removed: u64,
}

/// Aggregate counters for the `/stats` endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_files: u64,
    pub total_chunks: u64,
    pub total_nodes: u64,
    pub active_nodes: u64,
    /// Sum of non-deleted file sizes in bytes.
    pub total_size: u64,
    /// Capacity of the active fleet in bytes.
    pub total_space: u64,
    pub used_space: u64,
    pub free_space: u64,
}

/// Persistent store behind the metadata service.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Prepares schema and connectivity. Idempotent.
    async fn initialize(&self) -> Result<(), DfsError>;

    /// Releases the underlying connections.
    async fn close(&self) -> Result<(), DfsError>;

    /// Cheap connectivity probe for the health endpoint.
    async fn health_check(&self) -> Result<(), DfsError>;

    // ---- files -----------------------------------------------------------

    /// Inserts a new file row; fails with `Conflict` when a non-deleted file
    /// already owns the path.
    async fn insert_file(&self, file: &FileMetadata) -> Result<(), DfsError>;

    /// Fetches a non-deleted file by canonical path.
    async fn get_file_by_path(&self, path: &VirtualPath) -> Result<Option<FileMetadata>, DfsError>;

    /// Fetches a file by id regardless of deletion state.
    async fn get_file_by_id(&self, file_id: FileId) -> Result<Option<FileMetadata>, DfsError>;

    /// Every row recorded under a path, live and soft-deleted. Permanent
    /// deletion clears them all and needs their chunk placement first.
    async fn get_files_by_path_all(&self, path: &VirtualPath) -> Result<Vec<FileMetadata>, DfsError>;

    /// Writes a file row back in full (single-row atomicity).
    async fn update_file(&self, file: &FileMetadata) -> Result<(), DfsError>;

    /// Pages through non-deleted files, optionally filtered by path prefix,
    /// ordered by path.
    async fn list_files(
        &self,
        prefix: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FileMetadata>, DfsError>;

    /// Soft-deletes (default) or permanently removes a file by path.
    /// Returns false when no matching file existed.
    async fn delete_file(
        &self,
        path: &VirtualPath,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, DfsError>;

    /// Applies a client commit report to a planned file under the writer
    /// lock: validates the report against the plan, installs checksums and
    /// committed replicas (URLs resolved from the current node rows), and
    /// persists the row. Returns the updated file.
    async fn commit_file(
        &self,
        file_id: FileId,
        commits: &[ChunkCommit],
        now: DateTime<Utc>,
    ) -> Result<FileMetadata, DfsError>;

    // ---- nodes -----------------------------------------------------------

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeInfo>, DfsError>;

    /// All node rows, most recent heartbeat first.
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, DfsError>;

    /// Nodes in active state with a heartbeat newer than the timeout,
    /// ordered by descending free space.
    async fn active_nodes(
        &self,
        node_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeInfo>, DfsError>;

    /// Inserts or replaces a node row (registration path).
    async fn upsert_node(&self, node: &NodeInfo) -> Result<(), DfsError>;

    /// Folds a heartbeat into the store: updates the node row (creating it
    /// for unknown nodes), demotes nodes whose heartbeat is older than
    /// `node_timeout`, and syncs every non-deleted file's replica lists
    /// against the reported inventory. The inventory is authoritative.
    async fn apply_heartbeat(
        &self,
        heartbeat: &HeartbeatSample,
        node_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatSyncReport, DfsError>;

    // ---- leases ----------------------------------------------------------

    /// Non-blocking acquisition: fails with `Conflict` while a live lease
    /// exists on the path; expired leases are collected first.
    async fn try_acquire_lease(
        &self,
        path: &VirtualPath,
        operation: LeaseOperation,
        client_id: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, DfsError>;

    /// Deletes a lease by id; false when it was not held.
    async fn release_lease(&self, lease_id: LeaseId) -> Result<bool, DfsError>;

    /// Extends a live lease; `NotFound` when the id does not name a live
    /// lease.
    async fn renew_lease(
        &self,
        lease_id: LeaseId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, DfsError>;

    /// Removes expired leases; returns how many were swept.
    async fn delete_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, DfsError>;

    // ---- stats -----------------------------------------------------------

    async fn system_stats(&self, node_timeout: Duration, now: DateTime<Utc>)
        -> Result<SystemStats, DfsError>;
}
