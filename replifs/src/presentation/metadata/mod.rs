// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metadata Service API
//!
//! The HTTP surface of the metadata service under `/api/v1`: file protocol
//! (upload-init, commit, lookup, listing, delete), node management
//! (heartbeat, register, listing), leases, system endpoints, and the chunk
//! proxy for clients without direct node reachability.
//!
//! Handlers hold no state of their own: everything flows through the
//! [`MetadataServices`] struct the composition root builds; no globals.

pub mod files;
pub mod leases;
pub mod nodes;
pub mod proxy;
pub mod system;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;

use replifs_domain::MetadataStore;

use crate::application::{LeaseManager, UploadCoordinator};
use crate::infrastructure::config::DfsConfig;
use crate::infrastructure::http::NodeClient;
use crate::infrastructure::metrics::MetadataMetrics;

/// Everything the metadata handlers need, wired once at startup.
pub struct MetadataServices {
    pub store: Arc<dyn MetadataStore>,
    pub coordinator: UploadCoordinator,
    pub leases: LeaseManager,
    pub nodes: NodeClient,
    pub metrics: Arc<MetadataMetrics>,
    pub config: Arc<DfsConfig>,
}

/// Builds the metadata service router.
pub fn router(services: Arc<MetadataServices>) -> Router {
    // Proxy uploads carry one chunk plus multipart framing.
    let body_limit = (services.config.chunk_size as usize).saturating_mul(2) + 1024 * 1024;

    Router::new()
        .route("/api/v1/files/upload-init", post(files::upload_init))
        .route("/api/v1/files/commit", post(files::commit))
        .route("/api/v1/files", get(files::list_files))
        .route(
            "/api/v1/files/{*path}",
            get(files::get_file).delete(files::delete_file),
        )
        .route("/api/v1/nodes/heartbeat", post(nodes::heartbeat))
        .route("/api/v1/nodes/register", post(nodes::register))
        .route("/api/v1/nodes", get(nodes::list_nodes))
        .route("/api/v1/nodes/{node_id}", get(nodes::get_node))
        .route("/api/v1/leases/acquire", post(leases::acquire))
        .route("/api/v1/leases/release", post(leases::release))
        .route("/api/v1/leases/renew", post(leases::renew))
        .route("/api/v1/health", get(system::health))
        .route("/api/v1/stats", get(system::stats))
        .route("/metrics", get(system::metrics))
        .route(
            "/api/v1/proxy/chunks/{chunk_id}",
            put(proxy::upload_chunk).get(proxy::download_chunk),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(services)
}
