// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! File protocol handlers: upload-init, commit, lookup, listing, delete.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use replifs_domain::{DfsError, FileMetadata, MetadataStore, VirtualPath};

use crate::presentation::error::ApiError;
use crate::wire::{
    ChunkTarget, CommitRequest, CommitResponse, DeleteResponse, ListFilesQuery, UploadInitRequest,
    UploadInitResponse,
};

use super::MetadataServices;

/// `POST /api/v1/files/upload-init`
///
/// 409 on a held lease or taken path, 503 when fewer active nodes than the
/// replication factor.
pub async fn upload_init(
    State(services): State<Arc<MetadataServices>>,
    Json(request): Json<UploadInitRequest>,
) -> Result<Json<UploadInitResponse>, ApiError> {
    let (file_id, plans) = services
        .coordinator
        .upload_init(&request.path, request.size, request.chunk_size)
        .await?;

    let chunks = plans
        .into_iter()
        .map(|plan| ChunkTarget {
            chunk_id: plan.chunk_id,
            size: plan.size,
            targets: plan.targets.iter().map(|t| t.url.clone()).collect(),
            target_node_ids: plan.targets.into_iter().map(|t| t.node_id).collect(),
        })
        .collect();

    Ok(Json(UploadInitResponse { file_id, chunks }))
}

/// `POST /api/v1/files/commit`: 400 on plan mismatch.
pub async fn commit(
    State(services): State<Arc<MetadataServices>>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    let outcome = services
        .coordinator
        .commit(request.file_id, &request.chunks)
        .await?;

    Ok(Json(CommitResponse {
        status: "committed".to_string(),
        file_id: request.file_id,
        chunks: request.chunks.len(),
        total_replicas: outcome.total_replicas,
        under_replicated_chunks: outcome.under_replicated,
    }))
}

/// `GET /api/v1/files/{path}`: full metadata including replica placement.
pub async fn get_file(
    State(services): State<Arc<MetadataServices>>,
    Path(raw_path): Path<String>,
) -> Result<Json<FileMetadata>, ApiError> {
    let path = VirtualPath::parse(&raw_path)?;
    debug!("Get file metadata: {}", path);

    let file = services
        .store
        .get_file_by_path(&path)
        .await?
        .ok_or_else(|| DfsError::NotFound(format!("file {}", path)))?;
    Ok(Json(file))
}

/// `GET /api/v1/files?prefix=&limit=&offset=`
pub async fn list_files(
    State(services): State<Arc<MetadataServices>>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<Vec<FileMetadata>>, ApiError> {
    let limit = query.limit.clamp(1, 1000);
    let files = services
        .store
        .list_files(query.prefix.as_deref(), limit, query.offset)
        .await?;
    Ok(Json(files))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub permanent: bool,
}

/// `DELETE /api/v1/files/{path}?permanent=`: soft delete by default.
pub async fn delete_file(
    State(services): State<Arc<MetadataServices>>,
    Path(raw_path): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = services
        .coordinator
        .delete(&raw_path, query.permanent)
        .await?;

    if !deleted {
        return Err(DfsError::NotFound(format!("file {}", raw_path)).into());
    }

    Ok(Json(DeleteResponse {
        status: "deleted".to_string(),
        path: raw_path,
        permanent: query.permanent,
    }))
}
