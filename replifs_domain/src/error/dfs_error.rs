// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the error type shared by every layer of the
//! distributed file store. Errors are organized by failure *kind* rather than
//! by implementation detail, so the presentation layer can map them to HTTP
//! status codes and callers can decide on retry policy without string
//! matching.
//!
//! ## Error Categories
//!
//! - **Lookup failures**: [`DfsError::NotFound`]
//! - **Coordination failures**: [`DfsError::Conflict`] (a live lease or a
//!   path collision), [`DfsError::InsufficientNodes`]
//! - **Durability failures**: [`DfsError::StorageFailure`] (disk I/O on a
//!   storage node), [`DfsError::Corrupted`] (checksum mismatch; never
//!   silently repaired)
//! - **Distribution failures**: [`DfsError::NodeUnreachable`] (network error
//!   or timeout talking to a storage node)
//! - **Metadata failures**: [`DfsError::MetadataFailure`] (database errors),
//!   [`DfsError::SerializationFailure`]
//! - **Operational failures**: [`DfsError::SecurityFailure`],
//!   [`DfsError::ConfigurationFailure`], [`DfsError::Internal`]
//!
//! ## Propagation Policy
//!
//! Library code returns `Result<_, DfsError>` and propagates with `?`.
//! Background loops (reconciler, lease sweeper, heartbeat reporter) log their
//! iteration errors and keep running; only binaries convert to `anyhow` at
//! the very top.

use thiserror::Error;

/// Error type for all distributed file store operations.
///
/// The variants mirror the externally observable failure kinds of the
/// system. Messages carry enough context for operators (ids, paths) but
/// never raw payload data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DfsError {
    /// The requested file, chunk, node, or lease does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A concurrent claim exists: a live lease on the path, or the path is
    /// already taken by a non-deleted file.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Fewer active storage nodes than the replication factor requires.
    #[error("Insufficient nodes: {0}")]
    InsufficientNodes(String),

    /// Disk-level failure on a storage node.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Checksum verification failed; the replica is unusable.
    #[error("Corrupted chunk: {0}")]
    Corrupted(String),

    /// A storage node could not be reached or timed out.
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    /// The metadata database rejected or failed an operation.
    #[error("Metadata failure: {0}")]
    MetadataFailure(String),

    /// Encoding or decoding of persisted/wire data failed.
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    /// A request contradicts recorded state (commit/plan mismatch, bad
    /// parameters).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication or authorization failure (bad bootstrap token).
    #[error("Security failure: {0}")]
    SecurityFailure(String),

    /// Invalid or missing configuration.
    #[error("Configuration failure: {0}")]
    ConfigurationFailure(String),

    /// Unexpected internal failure; a bug or an unmodeled condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DfsError {
    /// True when a retry of the same operation may succeed without operator
    /// intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DfsError::NodeUnreachable(_) | DfsError::InsufficientNodes(_) | DfsError::Conflict(_)
        )
    }

    /// Short stable token for metrics labels and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DfsError::NotFound(_) => "not_found",
            DfsError::Conflict(_) => "conflict",
            DfsError::InsufficientNodes(_) => "insufficient_nodes",
            DfsError::StorageFailure(_) => "storage_failure",
            DfsError::Corrupted(_) => "corrupted",
            DfsError::NodeUnreachable(_) => "node_unreachable",
            DfsError::MetadataFailure(_) => "metadata_failure",
            DfsError::SerializationFailure(_) => "serialization_failure",
            DfsError::InvalidRequest(_) => "invalid_request",
            DfsError::SecurityFailure(_) => "security_failure",
            DfsError::ConfigurationFailure(_) => "configuration_failure",
            DfsError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for DfsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => DfsError::NotFound(err.to_string()),
            _ => DfsError::StorageFailure(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DfsError {
    fn from(err: serde_json::Error) -> Self {
        DfsError::SerializationFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = DfsError::NotFound("chunk 42".to_string());
        assert_eq!(err.to_string(), "Not found: chunk 42");

        let err = DfsError::Conflict("lease held on /a".to_string());
        assert!(err.to_string().contains("/a"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DfsError::NodeUnreachable("n1".into()).is_transient());
        assert!(DfsError::Conflict("lease".into()).is_transient());
        assert!(!DfsError::Corrupted("bad".into()).is_transient());
        assert!(!DfsError::StorageFailure("disk".into()).is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(DfsError::from(io), DfsError::NotFound(_)));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(DfsError::from(io), DfsError::StorageFailure(_)));
    }

    #[test]
    fn test_kind_tokens_are_stable() {
        assert_eq!(DfsError::Corrupted("x".into()).kind(), "corrupted");
        assert_eq!(DfsError::MetadataFailure("x".into()).kind(), "metadata_failure");
    }
}
