// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Node API
//!
//! Chunk PUT/GET/DELETE plus health and metrics. The PUT handler is the
//! pipeline: it persists locally (checksum, compress, atomic write) and
//! then forwards its on-disk compressed payload to the next hop of the
//! `replicate_to` tail, replying only after the downstream replied. A
//! failed forward shortens the confirmed-node list instead of failing the
//! request; local durability already happened, and the reconciler
//! restores the factor.
//!
//! Forwarded payloads carry `X-Chunk-Encoding: gzip` so the receiving node
//! decodes before checksumming instead of guessing at the content.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, info, warn};

use replifs_domain::{ChunkId, DfsError};

use crate::infrastructure::config::DfsConfig;
use crate::infrastructure::http::{
    decode_tail, NodeClient, CHUNK_CHECKSUM_HEADER, CHUNK_ENCODING_HEADER, CHUNK_ID_HEADER,
};
use crate::infrastructure::metrics::NodeMetrics;
use crate::infrastructure::storage::ChunkStore;
use crate::presentation::error::ApiError;
use crate::presentation::metadata::proxy::read_file_field;
use crate::wire::StoreChunkReply;

/// Everything the node handlers need, wired once at startup.
pub struct NodeServices {
    pub chunk_store: Arc<ChunkStore>,
    pub node_id: String,
    pub nodes: NodeClient,
    pub metrics: Arc<NodeMetrics>,
    pub config: Arc<DfsConfig>,
}

/// Builds the storage node router.
pub fn router(services: Arc<NodeServices>) -> Router {
    let body_limit = (services.config.chunk_size as usize).saturating_mul(2) + 1024 * 1024;

    Router::new()
        .route(
            "/api/v1/chunks/{chunk_id}",
            put(put_chunk).get(get_chunk).delete(delete_chunk),
        )
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(services)
}

#[derive(Debug, Default, Deserialize)]
pub struct PutChunkQuery {
    /// Remaining pipeline as pipe-separated `host:port` entries.
    #[serde(default)]
    pub replicate_to: Option<String>,
}

/// `PUT /api/v1/chunks/{chunk_id}?replicate_to=...`: multipart field
/// `file`.
async fn put_chunk(
    State(services): State<Arc<NodeServices>>,
    Path(chunk_id): Path<ChunkId>,
    Query(query): Query<PutChunkQuery>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<StoreChunkReply>), ApiError> {
    let payload = read_file_field(multipart).await?;

    // A pipeline predecessor sends its compressed artifact; decode before
    // checksumming so the store always sees the raw bytes.
    let compressed_inbound = headers
        .get(CHUNK_ENCODING_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    let data = if compressed_inbound {
        gunzip(payload).await.map_err(|e| {
            DfsError::InvalidRequest(format!("undecodable gzip payload for {}: {}", chunk_id, e))
        })?
    } else {
        payload
    };

    let stored = match services.chunk_store.store(chunk_id, data).await {
        Ok(stored) => stored,
        Err(e) => {
            services.metrics.store_failures_total.inc();
            return Err(e.into());
        }
    };
    services.metrics.chunks_stored_total.inc();
    services.metrics.bytes_stored_total.inc_by(stored.uncompressed_size);

    // Forward down the pipeline, outside the store mutex. Downstream
    // failure does not unwind the local write.
    let mut nodes = vec![services.node_id.clone()];
    let tail = query
        .replicate_to
        .as_deref()
        .map(decode_tail)
        .unwrap_or_default();

    if let Some((next, rest)) = tail.split_first() {
        services.metrics.pipeline_forwards_total.inc();
        match services.chunk_store.read_compressed(chunk_id).await {
            Ok(compressed) => {
                let rest_owned: Vec<String> = rest.to_vec();
                match services
                    .nodes
                    .store_chunk(
                        next,
                        chunk_id,
                        compressed,
                        true,
                        &rest_owned,
                        services.config.pipeline_timeout(),
                    )
                    .await
                {
                    Ok(reply) => {
                        debug!(
                            "Pipeline forward of {} to {} confirmed {} node(s)",
                            chunk_id,
                            next,
                            reply.nodes.len()
                        );
                        nodes.extend(reply.nodes);
                    }
                    Err(e) => {
                        services.metrics.pipeline_forward_failures_total.inc();
                        warn!(
                            "Pipeline forward of {} to {} failed ({} hops dropped): {}",
                            chunk_id,
                            next,
                            tail.len(),
                            e
                        );
                    }
                }
            }
            Err(e) => {
                services.metrics.pipeline_forward_failures_total.inc();
                warn!("Could not reread {} for forwarding: {}", chunk_id, e);
            }
        }
    }

    info!(
        "Stored chunk {} ({} bytes, {} confirmed node(s))",
        chunk_id,
        stored.uncompressed_size,
        nodes.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(StoreChunkReply {
            status: "stored".to_string(),
            chunk_id,
            size: stored.uncompressed_size,
            compressed_size: Some(stored.compressed_size),
            checksum: stored.checksum,
            node_id: services.node_id.clone(),
            nodes,
        }),
    ))
}

/// `GET /api/v1/chunks/{chunk_id}`: uncompressed bytes, verified.
async fn get_chunk(
    State(services): State<Arc<NodeServices>>,
    Path(chunk_id): Path<ChunkId>,
) -> Result<impl IntoResponse, ApiError> {
    let (data, checksum) = match services.chunk_store.retrieve(chunk_id).await {
        Ok(result) => result,
        Err(e) => {
            if matches!(e, DfsError::Corrupted(_)) {
                services.metrics.checksum_failures_total.inc();
            }
            return Err(e.into());
        }
    };

    services.metrics.chunks_served_total.inc();
    services.metrics.bytes_served_total.inc_by(data.len() as u64);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = header::HeaderValue::from_str(&chunk_id.to_string()) {
        headers.insert(CHUNK_ID_HEADER, value);
    }
    if let Ok(value) = header::HeaderValue::from_str(&checksum) {
        headers.insert(CHUNK_CHECKSUM_HEADER, value);
    }
    Ok((headers, data))
}

/// `DELETE /api/v1/chunks/{chunk_id}`: 404 when absent.
async fn delete_chunk(
    State(services): State<Arc<NodeServices>>,
    Path(chunk_id): Path<ChunkId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let existed = services.chunk_store.delete(chunk_id).await?;
    if !existed {
        return Err(DfsError::NotFound(format!("chunk {}", chunk_id)).into());
    }
    services.metrics.chunks_deleted_total.inc();
    Ok(Json(serde_json::json!({
        "status": "deleted",
        "chunk_id": chunk_id,
    })))
}

/// `GET /health`
async fn health(State(services): State<Arc<NodeServices>>) -> Json<serde_json::Value> {
    let info = services.chunk_store.storage_info().await;
    Json(serde_json::json!({
        "status": "ok",
        "node_id": services.node_id,
        "chunk_count": info.chunk_count,
        "free_space": info.free_space,
        "total_space": info.total_space,
    }))
}

/// `GET /metrics`
async fn metrics(State(services): State<Arc<NodeServices>>) -> Result<impl IntoResponse, ApiError> {
    let body = services.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Decompresses a forwarded pipeline payload off the async runtime.
async fn gunzip(payload: Vec<u8>) -> Result<Vec<u8>, String> {
    tokio::task::spawn_blocking(move || {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(payload.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| e.to_string())?;
        Ok(out)
    })
    .await
    .map_err(|e| e.to_string())?
}
