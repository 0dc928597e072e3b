// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Metadata Store
//!
//! The default [`MetadataStore`] implementation: three tables (`files`,
//! `nodes`, `leases`) in a single SQLite file, suitable for a single-writer
//! metadata service.
//!
//! ## Representation
//!
//! - `chunks_json` carries the canonical JSON of the ordered chunk list;
//!   all row transformations go through the `FileMetadata` methods, so the
//!   column stays byte-compatible with the PostgreSQL backend.
//! - Timestamps are RFC 3339 text with fixed microsecond precision, which
//!   makes lexicographic SQL comparison equal to chronological comparison.
//! - Live-path uniqueness comes from a partial unique index
//!   (`WHERE is_deleted = 0`): soft-deleted rows keep their path but release
//!   the name.
//!
//! ## Concurrency
//!
//! A process-wide async mutex serializes mutating operations. The lock
//! wraps only the read-modify-write of rows; callers perform network I/O
//! strictly outside the store. Plain reads skip the lock.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use replifs_domain::{
    ChunkCommit, ChunkEntry, DfsError, FileId, FileMetadata, HeartbeatSample, HeartbeatSyncReport,
    Lease, LeaseId, LeaseOperation, MetadataStore, NodeInfo, NodeState, SystemStats, VirtualPath,
};

use super::schema;

/// Fallback chunk port when a heartbeat carries no usable URL.
const DEFAULT_NODE_PORT: u16 = 8001;

/// SQLite-backed metadata store.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl SqliteMetadataStore {
    /// Connects to (creating if needed) and migrates the database at
    /// `database_url` (e.g. `sqlite:///var/lib/replifs/metadata.db`).
    pub async fn connect(database_url: &str) -> Result<Self, DfsError> {
        let pool = schema::initialize_database(database_url)
            .await
            .map_err(|e| DfsError::MetadataFailure(format!("open {}: {}", database_url, e)))?;
        info!("SQLite metadata store ready: {}", database_url);
        Ok(Self {
            pool,
            writer: Mutex::new(()),
        })
    }

    /// An in-memory store for tests.
    pub async fn in_memory() -> Result<Self, DfsError> {
        let pool = schema::initialize_in_memory()
            .await
            .map_err(|e| DfsError::MetadataFailure(format!("in-memory database: {}", e)))?;
        Ok(Self {
            pool,
            writer: Mutex::new(()),
        })
    }

    // ---- row mapping -----------------------------------------------------

    fn row_to_file(row: &SqliteRow) -> Result<FileMetadata, DfsError> {
        let chunks: Vec<ChunkEntry> = serde_json::from_str(row.get::<String, _>("chunks_json").as_str())?;
        Ok(FileMetadata {
            file_id: FileId::parse(row.get::<String, _>("file_id").as_str())?,
            path: VirtualPath::parse(row.get::<String, _>("path").as_str())?,
            size: row.get::<i64, _>("size") as u64,
            created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
            modified_at: parse_ts(row.get::<String, _>("modified_at").as_str())?,
            chunks,
            is_deleted: row.get::<i64, _>("is_deleted") != 0,
            deleted_at: row
                .get::<Option<String>, _>("deleted_at")
                .map(|s| parse_ts(&s))
                .transpose()?,
        })
    }

    fn row_to_node(row: &SqliteRow) -> Result<NodeInfo, DfsError> {
        let state: NodeState = match row.get::<String, _>("state").as_str() {
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
            port: row.get::<i64, _>("port") as u16,
            rack: row.get("rack"),
            free_space: row.get::<i64, _>("free_space") as u64,
            total_space: row.get::<i64, _>("total_space") as u64,
            chunk_count: row.get::<i64, _>("chunk_count") as u64,
            last_heartbeat: parse_ts(row.get::<String, _>("last_heartbeat").as_str())?,
            state,
            overlay_address: row.get("overlay_address"),
            overlay_peer_id: row.get("overlay_peer_id"),
        })
    }

    fn row_to_lease(row: &SqliteRow) -> Result<Lease, DfsError> {
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
            expires_at: parse_ts(row.get::<String, _>("expires_at").as_str())?,
        })
    }

    async fn write_file_row(&self, file: &FileMetadata) -> Result<u64, DfsError> {
        let chunks_json = serde_json::to_string(&file.chunks)?;
        let result = sqlx::query(
            "UPDATE files SET size = ?, modified_at = ?, is_deleted = ?, deleted_at = ?, chunks_json = ?
             WHERE file_id = ?",
        )
        .bind(file.size as i64)
        .bind(fmt_ts(file.modified_at))
        .bind(file.is_deleted as i64)
        .bind(file.deleted_at.map(fmt_ts))
        .bind(chunks_json)
        .bind(file.file_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// Current node URLs keyed by node id, for commit replica resolution.
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

    async fn demote_stale_nodes(&self, threshold: DateTime<Utc>) -> Result<u64, DfsError> {
        let result = sqlx::query(
            "UPDATE nodes SET state = 'inactive' WHERE state = 'active' AND last_heartbeat < ?",
        )
        .bind(fmt_ts(threshold))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn initialize(&self) -> Result<(), DfsError> {
        schema::ensure_schema(&self.pool)
            .await
            .map_err(|e| DfsError::MetadataFailure(format!("migrate: {}", e)))
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

    // ---- files -----------------------------------------------------------

    async fn insert_file(&self, file: &FileMetadata) -> Result<(), DfsError> {
        let _w = self.writer.lock().await;
        let chunks_json = serde_json::to_string(&file.chunks)?;

        let result = sqlx::query(
            "INSERT INTO files (file_id, path, size, created_at, modified_at, is_deleted, deleted_at, chunks_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file.file_id.to_string())
        .bind(file.path.as_str())
        .bind(file.size as i64)
        .bind(fmt_ts(file.created_at))
        .bind(fmt_ts(file.modified_at))
        .bind(file.is_deleted as i64)
        .bind(file.deleted_at.map(fmt_ts))
        .bind(chunks_json)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!("File row created: {} ({})", file.path, file.file_id);
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(DfsError::Conflict(format!(
                "path {} already exists",
                file.path
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_file_by_path(&self, path: &VirtualPath) -> Result<Option<FileMetadata>, DfsError> {
        let row = sqlx::query("SELECT * FROM files WHERE path = ? AND is_deleted = 0")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_file).transpose()
    }

    async fn get_file_by_id(&self, file_id: FileId) -> Result<Option<FileMetadata>, DfsError> {
        let row = sqlx::query("SELECT * FROM files WHERE file_id = ?")
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_file).transpose()
    }

    async fn get_files_by_path_all(&self, path: &VirtualPath) -> Result<Vec<FileMetadata>, DfsError> {
        let rows = sqlx::query("SELECT * FROM files WHERE path = ?")
            .bind(path.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_file).collect()
    }

    async fn update_file(&self, file: &FileMetadata) -> Result<(), DfsError> {
        let _w = self.writer.lock().await;
        let affected = self.write_file_row(file).await?;
        if affected == 0 {
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
                    "SELECT * FROM files WHERE is_deleted = 0 AND path LIKE ? ESCAPE '\\' ORDER BY path LIMIT ? OFFSET ?",
                )
                .bind(format!("{}%", like_escape(prefix)))
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM files WHERE is_deleted = 0 ORDER BY path LIMIT ? OFFSET ?")
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
            sqlx::query("DELETE FROM files WHERE path = ?")
                .bind(path.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_err)?
                .rows_affected()
        } else {
            sqlx::query(
                "UPDATE files SET is_deleted = 1, deleted_at = ?, modified_at = ? WHERE path = ? AND is_deleted = 0",
            )
            .bind(fmt_ts(now))
            .bind(fmt_ts(now))
            .bind(path.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected()
        };

        if affected > 0 {
            info!(
                "File {}: {}",
                path,
                if permanent { "permanently deleted" } else { "soft-deleted" }
            );
        }
        Ok(affected > 0)
    }

    async fn commit_file(
        &self,
        file_id: FileId,
        commits: &[ChunkCommit],
        now: DateTime<Utc>,
    ) -> Result<FileMetadata, DfsError> {
        let _w = self.writer.lock().await;

        let row = sqlx::query("SELECT * FROM files WHERE file_id = ?")
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

        info!("Commit applied: {} ({} chunks)", file.path, commits.len());
        Ok(file)
    }

    // ---- nodes -----------------------------------------------------------

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeInfo>, DfsError> {
        let row = sqlx::query("SELECT * FROM nodes WHERE node_id = ?")
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
        let threshold = now - node_timeout;
        let rows = sqlx::query(
            "SELECT * FROM nodes WHERE state = 'active' AND last_heartbeat > ? ORDER BY free_space DESC",
        )
        .bind(fmt_ts(threshold))
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
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(node_id) DO UPDATE SET
                host = excluded.host,
                port = excluded.port,
                rack = COALESCE(excluded.rack, nodes.rack),
                free_space = excluded.free_space,
                total_space = excluded.total_space,
                chunk_count = excluded.chunk_count,
                last_heartbeat = excluded.last_heartbeat,
                state = excluded.state,
                overlay_address = COALESCE(excluded.overlay_address, nodes.overlay_address),
                overlay_peer_id = COALESCE(excluded.overlay_peer_id, nodes.overlay_peer_id)",
        )
        .bind(&node.node_id)
        .bind(&node.host)
        .bind(node.port as i64)
        .bind(&node.rack)
        .bind(node.free_space as i64)
        .bind(node.total_space as i64)
        .bind(node.chunk_count as i64)
        .bind(fmt_ts(node.last_heartbeat))
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

        debug!(
            "Heartbeat from {}: {} chunk(s)",
            heartbeat.node_id,
            heartbeat.chunk_ids.len()
        );

        // 1. Node row: update or create from the reported facts.
        let existing = sqlx::query("SELECT * FROM nodes WHERE node_id = ?")
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

        let node = NodeInfo {
            node_id: heartbeat.node_id.clone(),
            host,
            port,
            rack: existing.as_ref().and_then(|n| n.rack.clone()),
            free_space: heartbeat.free_space,
            total_space: heartbeat.total_space,
            chunk_count: heartbeat.chunk_ids.len() as u64,
            last_heartbeat: now,
            state: NodeState::Active,
            overlay_address: heartbeat
                .overlay_address
                .clone()
                .or_else(|| existing.as_ref().and_then(|n| n.overlay_address.clone())),
            overlay_peer_id: heartbeat
                .overlay_peer_id
                .clone()
                .or_else(|| existing.as_ref().and_then(|n| n.overlay_peer_id.clone())),
        };

        if report.node_created {
            info!("Node {} created from first heartbeat", node.node_id);
        }

        sqlx::query(
            "INSERT INTO nodes (node_id, host, port, rack, free_space, total_space, chunk_count,
                                last_heartbeat, state, overlay_address, overlay_peer_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)
             ON CONFLICT(node_id) DO UPDATE SET
                host = excluded.host,
                port = excluded.port,
                free_space = excluded.free_space,
                total_space = excluded.total_space,
                chunk_count = excluded.chunk_count,
                last_heartbeat = excluded.last_heartbeat,
                state = 'active',
                overlay_address = excluded.overlay_address,
                overlay_peer_id = excluded.overlay_peer_id",
        )
        .bind(&node.node_id)
        .bind(&node.host)
        .bind(node.port as i64)
        .bind(&node.rack)
        .bind(node.free_space as i64)
        .bind(node.total_space as i64)
        .bind(node.chunk_count as i64)
        .bind(fmt_ts(now))
        .bind(&node.overlay_address)
        .bind(&node.overlay_peer_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // 2. Demote every node whose heartbeat went stale.
        report.nodes_marked_inactive = self.demote_stale_nodes(now - node_timeout).await?;

        // 3. Replica sync: the inventory is authoritative for this node.
        let node_url = heartbeat
            .url
            .clone()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| node.url());
        let inventory: HashSet<_> = heartbeat.chunk_ids.iter().copied().collect();

        let rows = sqlx::query("SELECT * FROM files WHERE is_deleted = 0")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        for row in &rows {
            let mut file = Self::row_to_file(row)?;
            let outcome = file.sync_node_inventory(&heartbeat.node_id, &node_url, &inventory, now);
            if outcome.replicas_removed > 0 {
                warn!(
                    "Heartbeat from {} no longer reports {} replica(s) of file {}; potential data loss, \
                     reconciler will restore the factor",
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

        if report.files_updated > 0 {
            info!(
                "Replica sync for {}: {} file(s) updated, +{} / -{} replicas",
                heartbeat.node_id, report.files_updated, report.replicas_added, report.replicas_removed
            );
        }
        Ok(report)
    }

    // ---- leases ----------------------------------------------------------

    async fn try_acquire_lease(
        &self,
        path: &VirtualPath,
        operation: LeaseOperation,
        client_id: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, DfsError> {
        let _w = self.writer.lock().await;

        // Expired leases are garbage; collect before checking.
        sqlx::query("DELETE FROM leases WHERE expires_at <= ?")
            .bind(fmt_ts(now))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let live = sqlx::query("SELECT * FROM leases WHERE path = ? AND expires_at > ?")
            .bind(path.as_str())
            .bind(fmt_ts(now))
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
            "INSERT INTO leases (lease_id, path, operation, client_id, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(lease.lease_id.to_string())
        .bind(lease.path.as_str())
        .bind(lease.operation.to_string())
        .bind(&lease.client_id)
        .bind(fmt_ts(lease.expires_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!("Lease acquired: {} ({})", path, lease.lease_id);
        Ok(lease)
    }

    async fn release_lease(&self, lease_id: LeaseId) -> Result<bool, DfsError> {
        let _w = self.writer.lock().await;
        let affected = sqlx::query("DELETE FROM leases WHERE lease_id = ?")
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

        let row = sqlx::query("SELECT * FROM leases WHERE lease_id = ? AND expires_at > ?")
            .bind(lease_id.to_string())
            .bind(fmt_ts(now))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| DfsError::NotFound(format!("live lease {}", lease_id)))?;

        let mut lease = Self::row_to_lease(&row)?;
        lease.renew(ttl, now);

        sqlx::query("UPDATE leases SET expires_at = ? WHERE lease_id = ?")
            .bind(fmt_ts(lease.expires_at))
            .bind(lease_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(lease)
    }

    async fn delete_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, DfsError> {
        let _w = self.writer.lock().await;
        let affected = sqlx::query("DELETE FROM leases WHERE expires_at <= ?")
            .bind(fmt_ts(now))
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        if affected > 0 {
            debug!("Swept {} expired lease(s)", affected);
        }
        Ok(affected)
    }

    // ---- stats -----------------------------------------------------------

    async fn system_stats(
        &self,
        node_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<SystemStats, DfsError> {
        let (total_files, total_size): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(size) FROM files WHERE is_deleted = 0",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let total_chunks: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(json_array_length(chunks_json)), 0) FROM files WHERE is_deleted = 0",
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

// ---- helpers -------------------------------------------------------------

/// Fixed-precision RFC 3339: lexicographic order equals chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, DfsError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DfsError::MetadataFailure(format!("bad timestamp '{}': {}", s, e)))
}

pub(crate) fn state_str(state: NodeState) -> &'static str {
    match state {
        NodeState::Active => "active",
        NodeState::Inactive => "inactive",
        NodeState::Draining => "draining",
        NodeState::Failed => "failed",
    }
}

/// Escapes LIKE wildcards in a user-supplied prefix.
pub(crate) fn like_escape(prefix: &str) -> String {
    prefix.replace('%', r"\%").replace('_', r"\_")
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

fn db_err(err: sqlx::Error) -> DfsError {
    DfsError::MetadataFailure(err.to_string())
}
