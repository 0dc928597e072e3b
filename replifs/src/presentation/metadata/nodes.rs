// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Node management handlers: heartbeat intake (the replica-truth pipeline),
//! token-guarded registration, and node listings.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use tracing::{debug, info};

use replifs_domain::{
    DfsError, HeartbeatSample, MetadataStore, NodeInfo, NodeRegistration, NodeState,
};

use crate::presentation::error::ApiError;
use crate::wire::{HeartbeatResponse, RegisterResponse};

use super::MetadataServices;

/// `POST /api/v1/nodes/heartbeat`
///
/// Folds the heartbeat into the metadata: node row upsert, stale-node
/// demotion, and the authoritative replica sync against the reported
/// inventory.
pub async fn heartbeat(
    State(services): State<Arc<MetadataServices>>,
    Json(sample): Json<HeartbeatSample>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    debug!(
        "Heartbeat: {} ({} chunks)",
        sample.node_id,
        sample.chunk_ids.len()
    );

    let report = services
        .store
        .apply_heartbeat(&sample, services.config.node_timeout(), Utc::now())
        .await?;

    services.metrics.heartbeats_total.inc();
    services.metrics.replicas_added_total.inc_by(report.replicas_added);
    services.metrics.replicas_pruned_total.inc_by(report.replicas_removed);

    Ok(Json(HeartbeatResponse {
        status: "ok".to_string(),
        node_id: sample.node_id,
    }))
}

/// `POST /api/v1/nodes/register`: bootstrap registration, 401 on a bad
/// token when the service has one configured.
pub async fn register(
    State(services): State<Arc<MetadataServices>>,
    Json(registration): Json<NodeRegistration>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if let Some(expected) = &services.config.bootstrap_token {
        let supplied = registration.bootstrap_token.as_deref().unwrap_or("");
        if supplied != expected {
            return Err(DfsError::SecurityFailure(format!(
                "bad bootstrap token for node {}",
                registration.node_id
            ))
            .into());
        }
    }

    let (host, port) = parse_url(registration.url.as_deref()).unwrap_or(("0.0.0.0".to_string(), 8001));

    let node = NodeInfo {
        node_id: registration.node_id.clone(),
        host,
        port,
        rack: registration.rack.clone(),
        free_space: registration.total_space,
        total_space: registration.total_space,
        chunk_count: 0,
        last_heartbeat: Utc::now(),
        state: NodeState::Active,
        overlay_address: registration.overlay_address.clone(),
        overlay_peer_id: registration.overlay_peer_id.clone(),
    };
    services.store.upsert_node(&node).await?;

    info!("Node registered: {} ({})", node.node_id, node.url());
    Ok(Json(RegisterResponse {
        status: "registered".to_string(),
        node_id: registration.node_id,
    }))
}

/// `GET /api/v1/nodes`
pub async fn list_nodes(
    State(services): State<Arc<MetadataServices>>,
) -> Result<Json<Vec<NodeInfo>>, ApiError> {
    Ok(Json(services.store.list_nodes().await?))
}

/// `GET /api/v1/nodes/{node_id}`
pub async fn get_node(
    State(services): State<Arc<MetadataServices>>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeInfo>, ApiError> {
    let node = services
        .store
        .get_node(&node_id)
        .await?
        .ok_or_else(|| DfsError::NotFound(format!("node {}", node_id)))?;
    Ok(Json(node))
}

fn parse_url(url: Option<&str>) -> Option<(String, u16)> {
    let url = url?;
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let rest = rest.split('/').next()?;
    let (host, port) = rest.rsplit_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert_eq!(parse_url(Some("http://10.0.0.1:8001")), Some(("10.0.0.1".into(), 8001)));
        assert_eq!(parse_url(Some("https://n:9/x")), Some(("n".into(), 9)));
        assert_eq!(parse_url(Some("bare-host")), None);
        assert_eq!(parse_url(None), None);
    }
}
