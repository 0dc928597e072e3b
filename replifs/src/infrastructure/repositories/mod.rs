// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Metadata store implementations and the backend factory.

pub mod postgres_metadata_store;
pub mod schema;
pub mod sqlite_metadata_store;

use std::sync::Arc;

use replifs_domain::{DfsError, MetadataStore};

use crate::infrastructure::config::{DfsConfig, MetadataBackend};

pub use postgres_metadata_store::PostgresMetadataStore;
pub use sqlite_metadata_store::SqliteMetadataStore;

/// Tagged-variant factory: builds the configured metadata backend.
pub async fn create_metadata_store(config: &DfsConfig) -> Result<Arc<dyn MetadataStore>, DfsError> {
    match config.metadata_backend {
        MetadataBackend::Sqlite => Ok(Arc::new(
            SqliteMetadataStore::connect(&config.database_url).await?,
        )),
        MetadataBackend::Postgres => Ok(Arc::new(
            PostgresMetadataStore::connect(&config.database_url).await?,
        )),
    }
}
