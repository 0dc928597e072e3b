// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Lease API handlers. External callers (clients coordinating their own
//! mutations) get the same non-blocking semantics the internal paths use:
//! acquisition on a held path answers 409 immediately.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use replifs_domain::{DfsError, LeaseOperation, VirtualPath};

use crate::presentation::error::ApiError;
use crate::wire::{
    LeaseAcquireRequest, LeaseReleaseRequest, LeaseReleaseResponse, LeaseRenewRequest,
    LeaseResponse,
};

use super::MetadataServices;

/// `POST /api/v1/leases/acquire`: 409 while a live lease exists.
pub async fn acquire(
    State(services): State<Arc<MetadataServices>>,
    Json(request): Json<LeaseAcquireRequest>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let path = VirtualPath::parse(&request.path)?;
    let operation = parse_operation(&request.operation)?;
    let ttl = request.ttl_seconds.map(|s| chrono::Duration::seconds(s as i64));

    let guard = match services
        .leases
        .acquire(&path, operation, request.client_id.clone(), ttl)
        .await
    {
        Ok(guard) => guard,
        Err(e) => {
            if matches!(e, DfsError::Conflict(_)) {
                services.metrics.lease_conflicts_total.inc();
            }
            return Err(e.into());
        }
    };

    // API leases belong to the caller until released or expired.
    let lease = guard.persist();
    Ok(Json(LeaseResponse {
        lease_id: lease.lease_id,
        path: lease.path.to_string(),
        expires_at: lease.expires_at,
    }))
}

/// `POST /api/v1/leases/release`: idempotent; `released:false` when the
/// lease was not held.
pub async fn release(
    State(services): State<Arc<MetadataServices>>,
    Json(request): Json<LeaseReleaseRequest>,
) -> Result<Json<LeaseReleaseResponse>, ApiError> {
    let released = services.leases.release(request.lease_id).await?;
    Ok(Json(LeaseReleaseResponse { released }))
}

/// `POST /api/v1/leases/renew`: 404 when the lease is not live.
pub async fn renew(
    State(services): State<Arc<MetadataServices>>,
    Json(request): Json<LeaseRenewRequest>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let ttl = request.ttl_seconds.map(|s| chrono::Duration::seconds(s as i64));
    let lease = services.leases.renew(request.lease_id, ttl).await?;
    Ok(Json(LeaseResponse {
        lease_id: lease.lease_id,
        path: lease.path.to_string(),
        expires_at: lease.expires_at,
    }))
}

fn parse_operation(raw: &str) -> Result<LeaseOperation, DfsError> {
    match raw {
        "write" => Ok(LeaseOperation::Write),
        "delete" => Ok(LeaseOperation::Delete),
        other => Err(DfsError::InvalidRequest(format!(
            "unknown lease operation '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation() {
        assert!(matches!(parse_operation("write"), Ok(LeaseOperation::Write)));
        assert!(matches!(parse_operation("delete"), Ok(LeaseOperation::Delete)));
        assert!(parse_operation("read").is_err());
    }
}
