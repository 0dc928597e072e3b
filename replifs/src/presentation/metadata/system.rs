// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! System endpoints: health probe, cluster statistics, Prometheus metrics.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use replifs_domain::MetadataStore;

use crate::presentation::error::ApiError;
use crate::wire::{HealthResponse, StatsResponse};

use super::MetadataServices;

/// `GET /api/v1/health`: probes the metadata store within the health
/// deadline; degraded storage answers 503 so load balancers rotate away.
pub async fn health(
    State(services): State<Arc<MetadataServices>>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let probe = tokio::time::timeout(
        services.config.health_timeout(),
        services.store.health_check(),
    )
    .await;

    match probe {
        Ok(Ok(())) => Ok(Json(HealthResponse {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            details: None,
        })),
        Ok(Err(e)) => Err(degraded(format!("metadata store: {}", e))),
        Err(_) => Err(degraded("metadata store: health probe timed out".to_string())),
    }
}

fn degraded(reason: String) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(HealthResponse {
            status: "degraded".to_string(),
            timestamp: Utc::now(),
            details: Some(serde_json::json!({ "reason": reason })),
        }),
    )
}

/// `GET /api/v1/stats`
pub async fn stats(
    State(services): State<Arc<MetadataServices>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = services
        .store
        .system_stats(services.config.node_timeout(), Utc::now())
        .await?;
    Ok(Json(StatsResponse {
        stats,
        replication_factor: services.config.replication_factor,
    }))
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(
    State(services): State<Arc<MetadataServices>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = services.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
