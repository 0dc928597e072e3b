// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # API Error Mapping
//!
//! One translation from [`DfsError`] kinds to HTTP status codes, shared by
//! both services. Handlers return `Result<_, ApiError>` and use `?`; the
//! response body always carries the message and the stable kind token.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use replifs_domain::DfsError;

use crate::wire::ErrorBody;

/// Wrapper turning a domain error into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub DfsError);

impl From<DfsError> for ApiError {
    fn from(err: DfsError) -> Self {
        Self(err)
    }
}

/// Status code for a domain error kind.
pub fn status_for(err: &DfsError) -> StatusCode {
    match err {
        DfsError::NotFound(_) => StatusCode::NOT_FOUND,
        DfsError::Conflict(_) => StatusCode::CONFLICT,
        DfsError::InsufficientNodes(_) => StatusCode::SERVICE_UNAVAILABLE,
        DfsError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DfsError::Corrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DfsError::NodeUnreachable(msg) => {
            if msg.contains("deadline exceeded") {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            }
        }
        DfsError::MetadataFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DfsError::SerializationFailure(_) => StatusCode::BAD_REQUEST,
        DfsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        DfsError::SecurityFailure(_) => StatusCode::UNAUTHORIZED,
        DfsError::ConfigurationFailure(_) => StatusCode::BAD_REQUEST,
        DfsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!("API error ({}): {}", status, self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_follows_protocol_table() {
        assert_eq!(status_for(&DfsError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&DfsError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&DfsError::InsufficientNodes("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&DfsError::SecurityFailure("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&DfsError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DfsError::Corrupted("checksum mismatch".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&DfsError::NodeUnreachable("host: deadline exceeded".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&DfsError::NodeUnreachable("connection refused".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
