// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Wire Types
//!
//! Request/response bodies of the HTTP/JSON interfaces, shared between the
//! axum handlers and the client library so both sides agree by
//! construction. Domain entities (`FileMetadata`, `NodeInfo`, `Lease`)
//! serialize directly where the interface exposes them; this module holds
//! only the envelope types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use replifs_domain::{ChunkCommit, ChunkId, FileId, LeaseId, SystemStats};

// ---- files ---------------------------------------------------------------

/// `POST /api/v1/files/upload-init` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitRequest {
    pub path: String,
    pub size: u64,
    /// Chunk size override in bytes; server default when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
}

/// One chunk of the upload plan: where the client must send it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkTarget {
    pub chunk_id: ChunkId,
    pub size: u64,
    /// Pipeline target URLs, head first.
    pub targets: Vec<String>,
    /// Node ids matching `targets`, used by proxy uploads.
    pub target_node_ids: Vec<String>,
}

/// `POST /api/v1/files/upload-init` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitResponse {
    pub file_id: FileId,
    pub chunks: Vec<ChunkTarget>,
}

/// `POST /api/v1/files/commit` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub file_id: FileId,
    pub chunks: Vec<ChunkCommit>,
}

/// `POST /api/v1/files/commit` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub status: String,
    pub file_id: FileId,
    /// Number of committed chunks.
    pub chunks: usize,
    /// Sum of replicas reported across all chunks.
    pub total_replicas: usize,
    /// Chunks committed with fewer nodes than the replication factor; the
    /// reconciler raises these to full strength.
    pub under_replicated_chunks: Vec<ChunkId>,
}

/// `DELETE /api/v1/files/{path}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub path: String,
    pub permanent: bool,
}

/// Query parameters of `GET /api/v1/files`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilesQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_list_limit() -> u32 {
    100
}

// ---- nodes ---------------------------------------------------------------

/// `POST /api/v1/nodes/heartbeat` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
    pub node_id: String,
}

/// `POST /api/v1/nodes/register` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub status: String,
    pub node_id: String,
}

// ---- leases --------------------------------------------------------------

/// `POST /api/v1/leases/acquire` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseAcquireRequest {
    pub path: String,
    /// `write` or `delete`.
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// `POST /api/v1/leases/release` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseReleaseRequest {
    pub lease_id: LeaseId,
}

/// `POST /api/v1/leases/renew` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRenewRequest {
    pub lease_id: LeaseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

/// Lease grant returned by acquire and renew.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseResponse {
    pub lease_id: LeaseId,
    pub path: String,
    pub expires_at: DateTime<Utc>,
}

/// `POST /api/v1/leases/release` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseReleaseResponse {
    pub released: bool,
}

// ---- system --------------------------------------------------------------

/// `GET /api/v1/health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// `GET /api/v1/stats` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: SystemStats,
    pub replication_factor: usize,
}

// ---- storage node --------------------------------------------------------

/// `PUT /api/v1/chunks/{chunk_id}` response, also produced by the metadata
/// proxy upload. `nodes` lists every node id that confirmed durable
/// storage, this node first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreChunkReply {
    pub status: String,
    pub chunk_id: ChunkId,
    /// Uncompressed payload size in bytes.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    /// SHA-256 over the uncompressed bytes.
    pub checksum: String,
    pub node_id: String,
    pub nodes: Vec<String>,
}

/// Error body produced by every API error path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_init_request_accepts_missing_chunk_size() {
        let req: UploadInitRequest =
            serde_json::from_str(r#"{"path":"/a","size":100}"#).unwrap();
        assert_eq!(req.chunk_size, None);
    }

    #[test]
    fn test_list_query_defaults() {
        let q: ListFilesQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.limit, 100);
        assert_eq!(q.offset, 0);
        assert_eq!(q.prefix, None);
    }

    #[test]
    fn test_stats_response_flattens_counters() {
        let resp = StatsResponse {
            stats: SystemStats {
                total_files: 3,
                ..Default::default()
            },
            replication_factor: 3,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["total_files"], 3);
        assert_eq!(json["replication_factor"], 3);
    }
}
