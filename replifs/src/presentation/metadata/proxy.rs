// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Chunk Proxy
//!
//! Relay endpoints for clients without direct reachability to storage
//! nodes (outside the deployment overlay). The proxy applies the same
//! pipeline semantics as a direct write: the payload goes once to the first
//! resolved node with the rest of the targets as the pipeline tail, and the
//! node's confirmation list is passed back verbatim. Downloads walk the
//! chunk's replicas in order and stream the first healthy copy.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::{debug, info, warn};

use replifs_domain::{ChunkId, DfsError, MetadataStore, VirtualPath};

use crate::infrastructure::http::{CHUNK_CHECKSUM_HEADER, CHUNK_ID_HEADER};
use crate::presentation::error::ApiError;
use crate::wire::StoreChunkReply;

use super::MetadataServices;

#[derive(Debug, Deserialize)]
pub struct ProxyUploadQuery {
    /// Comma-separated node ids, pipeline order.
    pub target_nodes: String,
}

/// `PUT /api/v1/proxy/chunks/{chunk_id}?target_nodes=a,b,c`
pub async fn upload_chunk(
    State(services): State<Arc<MetadataServices>>,
    Path(chunk_id): Path<ChunkId>,
    Query(query): Query<ProxyUploadQuery>,
    multipart: Multipart,
) -> Result<Json<StoreChunkReply>, ApiError> {
    let payload = read_file_field(multipart).await?;

    // Resolve target node rows; unknown ids are skipped with a warning so
    // a partially stale plan still makes progress.
    let mut targets = Vec::new();
    for node_id in query.target_nodes.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match services.store.get_node(node_id).await? {
            Some(node) => targets.push(node),
            None => warn!("Proxy upload: unknown target node {}", node_id),
        }
    }
    let head = targets
        .first()
        .ok_or_else(|| DfsError::NotFound("no resolvable target nodes".to_string()))?;

    let tail: Vec<String> = targets.iter().skip(1).map(|n| n.url()).collect();
    info!(
        "Proxy upload: chunk {} -> {} (+{} tail)",
        chunk_id,
        head.node_id,
        tail.len()
    );

    let reply = services
        .nodes
        .store_chunk(
            &head.url(),
            chunk_id,
            payload,
            false,
            &tail,
            services.config.pipeline_timeout(),
        )
        .await?;

    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
pub struct ProxyDownloadQuery {
    /// Path of the owning file, used to locate replicas.
    pub file_path: String,
}

/// `GET /api/v1/proxy/chunks/{chunk_id}?file_path=...`
pub async fn download_chunk(
    State(services): State<Arc<MetadataServices>>,
    Path(chunk_id): Path<ChunkId>,
    Query(query): Query<ProxyDownloadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let path = VirtualPath::parse(&query.file_path)?;
    let file = services
        .store
        .get_file_by_path(&path)
        .await?
        .ok_or_else(|| DfsError::NotFound(format!("file {}", path)))?;

    let chunk = file
        .chunks
        .iter()
        .find(|c| c.chunk_id == chunk_id)
        .ok_or_else(|| DfsError::NotFound(format!("chunk {} in {}", chunk_id, path)))?;

    if chunk.replicas.is_empty() {
        return Err(DfsError::NotFound(format!("no replicas for chunk {}", chunk_id)).into());
    }

    let mut last_error =
        DfsError::NodeUnreachable(format!("all replicas of chunk {} failed", chunk_id));
    for replica in &chunk.replicas {
        if replica.url.is_empty() {
            continue;
        }
        match services
            .nodes
            .fetch_chunk(&replica.url, chunk_id, services.config.repair_timeout())
            .await
        {
            Ok(fetched) => {
                debug!(
                    "Proxy download: chunk {} served from {}",
                    chunk_id, replica.node_id
                );
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("application/octet-stream"),
                );
                if let Ok(value) = header::HeaderValue::from_str(&chunk_id.to_string()) {
                    headers.insert(CHUNK_ID_HEADER, value);
                }
                if let Some(checksum) = fetched
                    .checksum
                    .as_deref()
                    .and_then(|c| header::HeaderValue::from_str(c).ok())
                {
                    headers.insert(CHUNK_CHECKSUM_HEADER, checksum);
                }
                return Ok((headers, fetched.data));
            }
            Err(e) => {
                warn!(
                    "Proxy download: replica {} failed for chunk {}: {}",
                    replica.node_id, chunk_id, e
                );
                last_error = e;
            }
        }
    }
    Err(last_error.into())
}

/// Pulls the bytes of the multipart `file` field.
pub(crate) async fn read_file_field(mut multipart: Multipart) -> Result<Vec<u8>, DfsError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DfsError::InvalidRequest(format!("multipart: {}", e)))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| DfsError::InvalidRequest(format!("multipart body: {}", e)))?;
            return Ok(bytes.to_vec());
        }
    }
    Err(DfsError::InvalidRequest("missing multipart field 'file'".to_string()))
}
