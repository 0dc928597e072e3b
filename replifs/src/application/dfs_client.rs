// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Client Library
//!
//! The client side of the upload protocol and the read path, used by the
//! `replifs` CLI and the end-to-end tests.
//!
//! ## Upload
//!
//! One `PUT` per chunk: the bytes go to the *head* of the chunk's target
//! list with the remaining targets as the pipeline tail; the storage nodes
//! fan the data down the chain. The client records which node ids
//! confirmed, computes its own SHA-256 per chunk, and commits the report.
//! A pipeline that confirms fewer than all targets still commits; the
//! reconciler restores the factor afterwards.
//!
//! ## Download
//!
//! Locate the file, then fetch every chunk in sequence order from any
//! replica, verifying each chunk against the committed checksum before
//! accepting it. Replicas are tried in order; one healthy copy suffices.
//!
//! ## Proxy Mode
//!
//! When the client cannot reach storage nodes directly (outside the
//! overlay), chunk traffic is routed through the metadata service's proxy
//! endpoints instead; the protocol is otherwise identical.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use replifs_domain::services::checksum::{sha256_hex, verify_sha256};
use replifs_domain::{ChunkCommit, DfsError, FileMetadata, NodeInfo};

use crate::infrastructure::http::{MetadataClient, NodeClient};
use crate::wire::{
    ChunkTarget, CommitRequest, CommitResponse, DeleteResponse, StatsResponse, UploadInitRequest,
};

/// Deadline for metadata control calls.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-chunk transfer deadline for pipeline writes and replica fetches.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(120);

/// High-level client for the distributed file store.
pub struct DfsClient {
    metadata: MetadataClient,
    nodes: NodeClient,
    /// Route chunk bytes through the metadata proxy endpoints.
    proxy: bool,
}

impl DfsClient {
    pub fn new(metadata_url: impl Into<String>) -> Self {
        Self {
            metadata: MetadataClient::new(metadata_url),
            nodes: NodeClient::new(),
            proxy: false,
        }
    }

    /// Switches chunk traffic to the metadata proxy endpoints.
    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    // ---- upload ----------------------------------------------------------

    /// Uploads an in-memory payload to `path`. Returns the commit summary.
    pub async fn upload_bytes(
        &self,
        path: &str,
        data: &[u8],
        chunk_size: Option<u64>,
    ) -> Result<CommitResponse, DfsError> {
        let init = self
            .metadata
            .upload_init(
                &UploadInitRequest {
                    path: path.to_string(),
                    size: data.len() as u64,
                    chunk_size,
                },
                CONTROL_TIMEOUT,
            )
            .await?;

        info!(
            "Uploading {} ({} bytes, {} chunks)",
            path,
            data.len(),
            init.chunks.len()
        );

        let mut commits = Vec::with_capacity(init.chunks.len());
        let mut offset = 0usize;
        for target in &init.chunks {
            let end = offset + target.size as usize;
            let slice = &data[offset..end];
            offset = end;

            let commit = self.push_chunk(target, slice.to_vec()).await?;
            commits.push(commit);
        }

        self.metadata
            .commit(
                &CommitRequest {
                    file_id: init.file_id,
                    chunks: commits,
                },
                CONTROL_TIMEOUT,
            )
            .await
    }

    /// Uploads a local file, reading one chunk at a time.
    pub async fn upload_file(
        &self,
        local: &Path,
        path: &str,
        chunk_size: Option<u64>,
    ) -> Result<CommitResponse, DfsError> {
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| DfsError::StorageFailure(format!("open {:?}: {}", local, e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| DfsError::StorageFailure(format!("stat {:?}: {}", local, e)))?
            .len();

        let init = self
            .metadata
            .upload_init(
                &UploadInitRequest {
                    path: path.to_string(),
                    size,
                    chunk_size,
                },
                CONTROL_TIMEOUT,
            )
            .await?;

        info!("Uploading {:?} -> {} ({} chunks)", local, path, init.chunks.len());

        let mut commits = Vec::with_capacity(init.chunks.len());
        for target in &init.chunks {
            let mut buffer = vec![0u8; target.size as usize];
            file.read_exact(&mut buffer)
                .await
                .map_err(|e| DfsError::StorageFailure(format!("read {:?}: {}", local, e)))?;

            let commit = self.push_chunk(target, buffer).await?;
            commits.push(commit);
        }

        self.metadata
            .commit(
                &CommitRequest {
                    file_id: init.file_id,
                    chunks: commits,
                },
                CONTROL_TIMEOUT,
            )
            .await
    }

    /// Sends one chunk to the head of its pipeline (or through the proxy)
    /// and builds the commit entry from the confirmed node set.
    async fn push_chunk(&self, target: &ChunkTarget, data: Vec<u8>) -> Result<ChunkCommit, DfsError> {
        let checksum = sha256_hex(&data);

        let reply = if self.proxy {
            self.metadata
                .proxy_store_chunk(target.chunk_id, data, &target.target_node_ids, CHUNK_TIMEOUT)
                .await?
        } else {
            let head = target.targets.first().ok_or_else(|| {
                DfsError::InsufficientNodes(format!("chunk {} has no targets", target.chunk_id))
            })?;
            let tail: Vec<String> = target.targets.iter().skip(1).cloned().collect();
            self.nodes
                .store_chunk(head, target.chunk_id, data, false, &tail, CHUNK_TIMEOUT)
                .await?
        };

        if reply.checksum != checksum {
            return Err(DfsError::Corrupted(format!(
                "chunk {}: node reported checksum {} but client computed {}",
                target.chunk_id, reply.checksum, checksum
            )));
        }
        if reply.nodes.len() < target.targets.len().max(target.target_node_ids.len()) {
            warn!(
                "Chunk {} confirmed on {}/{} targets; reconciler will restore the rest",
                target.chunk_id,
                reply.nodes.len(),
                target.targets.len().max(target.target_node_ids.len())
            );
        }

        Ok(ChunkCommit {
            chunk_id: target.chunk_id,
            checksum,
            nodes: reply.nodes,
        })
    }

    // ---- download --------------------------------------------------------

    /// Downloads a file into memory, verifying every chunk.
    pub async fn download_bytes(&self, path: &str) -> Result<Vec<u8>, DfsError> {
        let file = self.metadata.get_file(path, CONTROL_TIMEOUT).await?;
        let mut chunks = file.chunks.clone();
        chunks.sort_by_key(|c| c.seq_index);

        let mut out = Vec::with_capacity(file.size as usize);
        for chunk in &chunks {
            let data = self.fetch_verified(path, chunk).await?;
            out.extend_from_slice(&data);
        }

        if out.len() as u64 != file.size {
            return Err(DfsError::Corrupted(format!(
                "{}: reassembled {} bytes, metadata says {}",
                path,
                out.len(),
                file.size
            )));
        }
        Ok(out)
    }

    /// Downloads a file to disk, chunk by chunk.
    pub async fn download_file(&self, path: &str, local: &Path) -> Result<u64, DfsError> {
        let file = self.metadata.get_file(path, CONTROL_TIMEOUT).await?;
        let mut chunks = file.chunks.clone();
        chunks.sort_by_key(|c| c.seq_index);

        let mut output = tokio::fs::File::create(local)
            .await
            .map_err(|e| DfsError::StorageFailure(format!("create {:?}: {}", local, e)))?;

        for chunk in &chunks {
            let data = self.fetch_verified(path, chunk).await?;
            output
                .write_all(&data)
                .await
                .map_err(|e| DfsError::StorageFailure(format!("write {:?}: {}", local, e)))?;
        }
        output
            .flush()
            .await
            .map_err(|e| DfsError::StorageFailure(format!("flush {:?}: {}", local, e)))?;
        output.rewind().await.ok();

        info!("Downloaded {} -> {:?} ({} bytes)", path, local, file.size);
        Ok(file.size)
    }

    /// Fetches one chunk from any replica, verifying against the committed
    /// checksum. Tries replicas in order; a corrupt or unreachable replica
    /// is skipped.
    async fn fetch_verified(
        &self,
        path: &str,
        chunk: &replifs_domain::ChunkEntry,
    ) -> Result<Vec<u8>, DfsError> {
        if self.proxy {
            let data = self
                .metadata
                .proxy_fetch_chunk(chunk.chunk_id, path, CHUNK_TIMEOUT)
                .await?;
            if let Some(expected) = &chunk.checksum {
                verify_sha256(&data, expected, &format!("chunk {}", chunk.chunk_id))?;
            }
            return Ok(data);
        }

        let mut last_error = DfsError::NotFound(format!(
            "chunk {} has no replicas",
            chunk.chunk_id
        ));
        for replica in &chunk.replicas {
            if replica.url.is_empty() {
                continue;
            }
            match self
                .nodes
                .fetch_chunk(&replica.url, chunk.chunk_id, CHUNK_TIMEOUT)
                .await
            {
                Ok(fetched) => {
                    if let Some(expected) = &chunk.checksum {
                        if let Err(e) = verify_sha256(
                            &fetched.data,
                            expected,
                            &format!("chunk {} from {}", chunk.chunk_id, replica.node_id),
                        ) {
                            warn!("{}", e);
                            last_error = e;
                            continue;
                        }
                    }
                    debug!(
                        "Fetched chunk {} from {} ({} bytes)",
                        chunk.chunk_id,
                        replica.node_id,
                        fetched.data.len()
                    );
                    return Ok(fetched.data);
                }
                Err(e) => {
                    debug!(
                        "Replica {} unusable for chunk {}: {}",
                        replica.node_id, chunk.chunk_id, e
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    // ---- metadata passthrough -------------------------------------------

    pub async fn stat(&self, path: &str) -> Result<FileMetadata, DfsError> {
        self.metadata.get_file(path, CONTROL_TIMEOUT).await
    }

    pub async fn list(
        &self,
        prefix: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FileMetadata>, DfsError> {
        self.metadata.list_files(prefix, limit, offset, CONTROL_TIMEOUT).await
    }

    pub async fn delete(&self, path: &str, permanent: bool) -> Result<DeleteResponse, DfsError> {
        self.metadata.delete_file(path, permanent, CONTROL_TIMEOUT).await
    }

    pub async fn nodes(&self) -> Result<Vec<NodeInfo>, DfsError> {
        self.metadata.list_nodes(CONTROL_TIMEOUT).await
    }

    pub async fn stats(&self) -> Result<StatsResponse, DfsError> {
        self.metadata.stats(CONTROL_TIMEOUT).await
    }
}
