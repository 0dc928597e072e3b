// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # PostgreSQL Metadata Store
//!
//! The [`MetadataStore`] implementation for deployments that already run
//! PostgreSQL. Same tables and the same `chunks_json` representation as the
//! SQLite backend; every row transformation goes through the shared
//! `FileMetadata` methods, so the two backends cannot drift semantically.
//!
//! Schema DDL is applied at initialization (`CREATE TABLE IF NOT EXISTS`) -
//! the workspace migration files are SQLite-dialect and PostgreSQL types
//! differ (`TIMESTAMPTZ`, `BOOLEAN`, `BIGINT`).
//!
//! Behavior coverage lives in the SQLite store's test suite and the shared
//! domain tests; this backend adds only dialect plumbing.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use replifs_domain::{
    ChunkCommit, ChunkEntry, DfsError, FileId, FileMetadata, HeartbeatSample, HeartbeatSyncReport,
    Lease, LeaseId, LeaseOperation, MetadataStore, NodeInfo, NodeState, SystemStats, VirtualPath,
};

use super::sqlite_metadata_store::{like_escape, state_str};

const DEFAULT_NODE_PORT: u16 = 8001;

const SCHEMA_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
        file_id TEXT PRIMARY KEY,
        path TEXT NOT NULL,
        size BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        modified_at TIMESTAMPTZ NOT NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
        deleted_at TIMESTAMPTZ,
        chunks_json TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_path_live ON files(path) WHERE is_deleted = FALSE",
    "CREATE INDEX IF NOT EXISTS idx_files_path ON files(path)",
    "CREATE INDEX IF NOT EXISTS idx_files_deleted ON files(is_deleted)",
    "CREATE TABLE IF NOT EXISTS nodes (
        node_id TEXT PRIMARY KEY,
        host TEXT NOT NULL,
        port INT NOT NULL,
        rack TEXT,
        free_space BIGINT NOT NULL DEFAULT 0,
        total_space BIGINT NOT NULL DEFAULT 0,
        chunk_count BIGINT NOT NULL DEFAULT 0,
        last_heartbeat TIMESTAMPTZ NOT NULL,
        state TEXT NOT NULL,
        overlay_address TEXT,
        overlay_peer_id TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_nodes_state ON nodes(state)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_heartbeat ON nodes(last_heartbeat)",
    "CREATE TABLE IF NOT EXISTS leases (
        lease_id TEXT PRIMARY KEY,
        path TEXT NOT NULL,
        operation TEXT NOT NULL,
        client_id TEXT,
        expires_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_leases_path ON leases(path)",
    "CREATE INDEX IF NOT EXISTS idx_leases_expires ON leases(expires_at)",
];

/// PostgreSQL-backed metadata store.
pub struct PostgresMetadataStore {
    pool: PgPool,
    writer: Mutex<()>,
}

impl PostgresMetadataStore {
    /// Connects to the given DSN and applies the schema.
    pub async fn connect(database_url: &str) -> Result<Self, DfsError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| DfsError::MetadataFailure(format!("connect postgres: {}", e)))?;
        let store = Self {
            pool,
            writer: Mutex::new(()),
        };
        store.initialize().await?;
        info!("PostgreSQL metadata store ready");
        Ok(store)
    }

    fn row_to_file(row: &PgRow) -> Result<FileMetadata, DfsError> {
        let chunks: Vec<ChunkEntry> =
            serde_json::from_str(row.get::<String, _>("chunks_json").as_str())?;
        Ok(FileMetadata {
            file_id: FileId::parse(row.get::<String, _>("file_id").as_str())?,
            path: VirtualPath::parse(row.get::<String, _>("path").as_str())?,
            size: row.get::<i64, _>("size") as u64,
            created_at: row.get("created_at"),
            modified_at: row.get("modified_at"),
            chunks,
            is_deleted: row.get("is_deleted"),
            deleted_at: row.get("deleted_at"),
        })
    }

    fn row_to_node(row: &PgRow) -> Result<NodeInfo, DfsError> {
        let state = match row.get::<String, _>("state").as_str() {
            "active" => NodeState::Active,
            "inactive" => NodeState::Inactive,
            "draining" => NodeState::Draining,
            "failed" => NodeState::Failed,
            other => {
                return Err(DfsError::MetadataFailure(format!("unknown node state '{}'", other)));
            }
        };
        Ok(NodeInfo {
            node_id: row.get("node_id"),
            host: row.get("host"),
            port: row.get::<i32, _>("port") as u16,
            rack: row.get("rack"),
            free_space: row.get::<i64, _>("free_space") as u64,
            total_space: row.get::<i64, _>("total_space") as u64,
            chunk_count: row.get::<i64, _>("chunk_count") as u64,
            last_heartbeat: row.get("last_heartbeat"),
            state,
            overlay_address: row.get("overlay_address"),
            overlay_peer_id: row.get("overlay_peer_id"),
        })
    }

    fn row_to_lease(row: &PgRow) -> Result<Lease, DfsError> {
        let operation = match row.get::<String, _>("operation").as_str() {
            "write" => LeaseOperation::Write,
            "delete" => LeaseOperation::Delete,
            other => {
                return Err(DfsError::MetadataFailure(format!(
                    "unknown lease operation '{}'",
                    other
                )));
            }
        };
        Ok(Lease {
            lease_id: LeaseId::parse(row.get::<String, _>("lease_id").as_str())?,
            path: VirtualPath::parse(row.get::<String, _>("path").as_str())?,
            operation,
            client_id: row.get("client_id"),
            expires_at: row.get("expires_at"),
        })
    }

    async fn write_file_row(&self, file: &FileMetadata) -> Result<u64, DfsError> {
        let chunks_json = serde_json::to_string(&file.chunks)?;
        let result = sqlx::query(
            "UPDATE files SET size = $1, modified_at = $2, is_deleted = $3, deleted_at = $4, chunks_json = $5
             WHERE file_id = $6",
        )
        .bind(file.size as i64)
        .bind(file.modified_at)
        .bind(file.is_deleted)
        .bind(file.deleted_at)
        .bind(chunks_json)
        .bind(file.file_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn node_urls(&self) -> Result<HashMap<String, String>, DfsError> {
        let rows = sqlx::query("SELECT * FROM nodes")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            let node = Self::row_to_node(row)?;
            map.insert(node.node_id.clone(), node.url());
        }
        Ok(map)
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn initialize(&self) -> Result<(), DfsError> {
        for ddl in SCHEMA_DDL {
            sqlx::query(ddl).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DfsError> {
        self.pool.close().await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DfsError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn insert_file(&self, file: &FileMetadata) -> Result<(), DfsError> {
        let _w = self.writer.lock().await;
        let chunks_json = serde_json::to_string(&file.chunks)?;

        let result = sqlx::query(
            "INSERT INTO files (file_id, path, size, created_at, modified_at, is_deleted, deleted_at, chunks_json)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(file.file_id.to_string())
        .bind(file.path.as_str())
        .bind(file.size as i64)
        .bind(file.created_at)
        .bind(file.modified_at)
        .bind(file.is_deleted)
        .bind(file.deleted_at)
        .bind(chunks_json)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!("File row created: {} ({})", file.path, file.file_id);
                Ok(())
            }
            Err(e)
                if e.as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false) =>
            {
                Err(DfsError::Conflict(format!("path {} already exists", file.path)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_file_by_path(&self, path: &VirtualPath) -> Result<Option<FileMetadata>, DfsError> {
        let row = sqlx::query("SELECT * FROM files WHERE path = $1 AND is_deleted = FALSE")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_file).transpose()
    }

    async fn get_file_by_id(&self, file_id: FileId) -> Result<Option<FileMetadata>, DfsError> {
        let row = sqlx::query("SELECT * FROM files WHERE file_id = $1")
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_file).transpose()
    }

    async fn get_files_by_path_all(&self, path: &VirtualPath) -> Result<Vec<FileMetadata>, DfsError> {
        let rows = sqlx::query("SELECT * FROM files WHERE path = $1")
            .bind(path.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_file).collect()
    }

    async fn update_file(&self, file: &FileMetadata) -> Result<(), DfsError> {
        let _w = self.writer.lock().await;
        if self.write_file_row(file).await? == 0 {
            return Err(DfsError::NotFound(format!("file {}", file.file_id)));
        }
        Ok(())
    }

    async fn list_files(
        &self,
        prefix: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FileMetadata>, DfsError> {
        let rows = match prefix {
            Some(prefix) => {
                sqlx::query(
                    "SELECT * FROM files WHERE is_deleted = FALSE AND path LIKE $1 ORDER BY path LIMIT $2 OFFSET $3",
                )
                .bind(format!("{}%", like_escape(prefix)))
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM files WHERE is_deleted = FALSE ORDER BY path LIMIT $1 OFFSET $2",
                )
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_file).collect()
    }

    async fn delete_file(
        &self,
        path: &VirtualPath,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, DfsError> {
        let _w = self.writer.lock().await;
        let affected = if permanent {
            sqlx::query("DELETE FROM files WHERE path = $1")
                .bind(path.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_err)?
                .rows_affected()
        } else {
            sqlx::query(
                "UPDATE files SET is_deleted = TRUE, deleted_at = $1, modified_at = $2
                 WHERE path = $3 AND is_deleted = FALSE",
            )
            .bind(now)
            .bind(now)
            .bind(path.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected()
        };
        Ok(affected > 0)
    }

    async fn commit_file(
        &self,
        file_id: FileId,
        commits: &[ChunkCommit],
        now: DateTime<Utc>,
    ) -> Result<FileMetadata, DfsError> {
        let _w = self.writer.lock().await;

        let row = sqlx::query("SELECT * FROM files WHERE file_id = $1")
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| DfsError::NotFound(format!("file {}", file_id)))?;
        let mut file = Self::row_to_file(&row)?;
        if file.is_deleted {
            return Err(DfsError::NotFound(format!("file {} is deleted", file_id)));
        }

        let urls = self.node_urls().await?;
        file.apply_commit(commits, now, |node_id| urls.get(node_id).cloned())?;
        self.write_file_row(&file).await?;
        Ok(file)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeInfo>, DfsError> {
        let row = sqlx::query("SELECT * FROM nodes WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_node).transpose()
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, DfsError> {
        let rows = sqlx::query("SELECT * FROM nodes ORDER BY last_heartbeat DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn active_nodes(
        &self,
        node_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeInfo>, DfsError> {
        let rows = sqlx::query(
            "SELECT * FROM nodes WHERE state = 'active' AND last_heartbeat > $1 ORDER BY free_space DESC",
        )
        .bind(now - node_timeout)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn upsert_node(&self, node: &NodeInfo) -> Result<(), DfsError> {
        let _w = self.writer.lock().await;
        sqlx::query(
            "INSERT INTO nodes (node_id, host, port, rack, free_space, total_space, chunk_count,
                                last_heartbeat, state, overlay_address, overlay_peer_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (node_id) DO UPDATE SET
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                rack = COALESCE(EXCLUDED.rack, nodes.rack),
                free_space = EXCLUDED.free_space,
                total_space = EXCLUDED.total_space,
                chunk_count = EXCLUDED.chunk_count,
                last_heartbeat = EXCLUDED.last_heartbeat,
                state = EXCLUDED.state,
                overlay_address = COALESCE(EXCLUDED.overlay_address, nodes.overlay_address),
                overlay_peer_id = COALESCE(EXCLUDED.overlay_peer_id, nodes.overlay_peer_id)",
        )
        .bind(&node.node_id)
        .bind(&node.host)
        .bind(node.port as i32)
        .bind(&node.rack)
        .bind(node.free_space as i64)
        .bind(node.total_space as i64)
        .bind(node.chunk_count as i64)
        .bind(node.last_heartbeat)
        .bind(state_str(node.state))
        .bind(&node.overlay_address)
        .bind(&node.overlay_peer_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn apply_heartbeat(
        &self,
        heartbeat: &HeartbeatSample,
        node_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatSyncReport, DfsError> {
        let _w = self.writer.lock().await;
        let mut report = HeartbeatSyncReport::default();

        let existing = sqlx::query("SELECT * FROM nodes WHERE node_id = $1")
            .bind(&heartbeat.node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let existing = existing.as_ref().map(Self::row_to_node).transpose()?;
        report.node_created = existing.is_none();

        let (host, port) = match heartbeat.host_port() {
            Some(hp) => hp,
            None => existing
                .as_ref()
                .map(|n| (n.host.clone(), n.port))
                .unwrap_or_else(|| ("0.0.0.0".to_string(), DEFAULT_NODE_PORT)),
        };

        let overlay_address = heartbeat
            .overlay_address
            .clone()
            .or_else(|| existing.as_ref().and_then(|n| n.overlay_address.clone()));
        let overlay_peer_id = heartbeat
            .overlay_peer_id
            .clone()
            .or_else(|| existing.as_ref().and_then(|n| n.overlay_peer_id.clone()));

        sqlx::query(
            "INSERT INTO nodes (node_id, host, port, rack, free_space, total_space, chunk_count,
                                last_heartbeat, state, overlay_address, overlay_peer_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9, $10)
             ON CONFLICT (node_id) DO UPDATE SET
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                free_space = EXCLUDED.free_space,
                total_space = EXCLUDED.total_space,
                chunk_count = EXCLUDED.chunk_count,
                last_heartbeat = EXCLUDED.last_heartbeat,
                state = 'active',
                overlay_address = EXCLUDED.overlay_address,
                overlay_peer_id = EXCLUDED.overlay_peer_id",
        )
        .bind(&heartbeat.node_id)
        .bind(&host)
        .bind(port as i32)
        .bind(existing.as_ref().and_then(|n| n.rack.clone()))
        .bind(heartbeat.free_space as i64)
        .bind(heartbeat.total_space as i64)
        .bind(heartbeat.chunk_ids.len() as i64)
        .bind(now)
        .bind(&overlay_address)
        .bind(&overlay_peer_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        report.nodes_marked_inactive = sqlx::query(
            "UPDATE nodes SET state = 'inactive' WHERE state = 'active' AND last_heartbeat < $1",
        )
        .bind(now - node_timeout)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        let node_url = heartbeat
            .url
            .clone()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| {
                let host = overlay_address.as_deref().unwrap_or(&host);
                format!("http://{}:{}", host, port)
            });
        let inventory: HashSet<_> = heartbeat.chunk_ids.iter().copied().collect();

        let rows = sqlx::query("SELECT * FROM files WHERE is_deleted = FALSE")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        for row in &rows {
            let mut file = Self::row_to_file(row)?;
            let outcome = file.sync_node_inventory(&heartbeat.node_id, &node_url, &inventory, now);
            if outcome.replicas_removed > 0 {
                warn!(
                    "Heartbeat from {} no longer reports {} replica(s) of file {}; potential data loss",
                    heartbeat.node_id, outcome.replicas_removed, file.path
                );
            }
            if outcome.changed() {
                self.write_file_row(&file).await?;
                report.files_updated += 1;
                report.replicas_added += outcome.replicas_added as u64;
                report.replicas_removed += outcome.replicas_removed as u64;
            }
        }

        debug!(
            "Heartbeat from {} folded: {} file(s) updated",
            heartbeat.node_id, report.files_updated
        );
        Ok(report)
    }

    async fn try_acquire_lease(
        &self,
        path: &VirtualPath,
        operation: LeaseOperation,
        client_id: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, DfsError> {
        let _w = self.writer.lock().await;

        sqlx::query("DELETE FROM leases WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let live = sqlx::query("SELECT * FROM leases WHERE path = $1 AND expires_at > $2")
            .bind(path.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some(row) = live {
            let held = Self::row_to_lease(&row)?;
            return Err(DfsError::Conflict(format!(
                "lease held on {} until {}",
                path, held.expires_at
            )));
        }

        let lease = Lease::new(path.clone(), operation, client_id, ttl, now);
        sqlx::query(
            "INSERT INTO leases (lease_id, path, operation, client_id, expires_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(lease.lease_id.to_string())
        .bind(lease.path.as_str())
        .bind(lease.operation.to_string())
        .bind(&lease.client_id)
        .bind(lease.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(lease)
    }

    async fn release_lease(&self, lease_id: LeaseId) -> Result<bool, DfsError> {
        let _w = self.writer.lock().await;
        let affected = sqlx::query("DELETE FROM leases WHERE lease_id = $1")
            .bind(lease_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn renew_lease(
        &self,
        lease_id: LeaseId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, DfsError> {
        let _w = self.writer.lock().await;

        let row = sqlx::query("SELECT * FROM leases WHERE lease_id = $1 AND expires_at > $2")
            .bind(lease_id.to_string())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| DfsError::NotFound(format!("live lease {}", lease_id)))?;

        let mut lease = Self::row_to_lease(&row)?;
        lease.renew(ttl, now);

        sqlx::query("UPDATE leases SET expires_at = $1 WHERE lease_id = $2")
            .bind(lease.expires_at)
            .bind(lease_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(lease)
    }

    async fn delete_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, DfsError> {
        let _w = self.writer.lock().await;
        Ok(sqlx::query("DELETE FROM leases WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected())
    }

    async fn system_stats(
        &self,
        node_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<SystemStats, DfsError> {
        let (total_files, total_size): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), SUM(size) FROM files WHERE is_deleted = FALSE")
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        let total_chunks: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(jsonb_array_length(chunks_json::jsonb)), 0)::BIGINT
             FROM files WHERE is_deleted = FALSE",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let total_nodes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let active = self.active_nodes(node_timeout, now).await?;
        let total_space: u64 = active.iter().map(|n| n.total_space).sum();
        let free_space: u64 = active.iter().map(|n| n.free_space).sum();

        Ok(SystemStats {
            total_files: total_files as u64,
            total_chunks: total_chunks as u64,
            total_nodes: total_nodes as u64,
            active_nodes: active.len() as u64,
            total_size: total_size.unwrap_or(0) as u64,
            total_space,
            used_space: total_space.saturating_sub(free_space),
            free_space,
        })
    }
}

fn db_err(err: sqlx::Error) -> DfsError {
    DfsError::MetadataFailure(err.to_string())
}
