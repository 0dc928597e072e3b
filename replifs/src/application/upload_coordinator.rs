// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Upload/Commit Coordinator
//!
//! Orchestrates the three-phase upload protocol on the metadata side:
//!
//! 1. **upload-init**: take the write lease on the path, plan placement,
//!    create the file row in planned state, hand the client its per-chunk
//!    pipeline targets. The lease stays held until commit.
//! 2. **pipeline write**: client-side; the coordinator is not involved.
//! 3. **commit**: validate the report against the plan, install checksums
//!    and committed replicas atomically in the file row, release the lease
//!    on every exit. Under-replicated chunks are accepted with a warning;
//!    the reconciler raises them to the factor and the next heartbeats trim
//!    or confirm what the client reported.
//!
//! Deletion also runs through the coordinator so it takes the delete lease
//! and, for permanent deletes, clears replicas off the storage nodes.
//!
//! Ordering: within one `file_id`, upload-init happens-before commit,
//! enforced by the lease held in between.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use replifs_domain::services::plan_placement;
use replifs_domain::services::placement_planner::ChunkPlan;
use replifs_domain::{
    ChunkCommit, ChunkId, ChunkSize, DfsError, FileId, FileMetadata, Lease, LeaseOperation,
    MetadataStore, VirtualPath,
};

use crate::application::lease_manager::LeaseManager;
use crate::infrastructure::config::DfsConfig;
use crate::infrastructure::http::NodeClient;
use crate::infrastructure::metrics::MetadataMetrics;

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub file: FileMetadata,
    pub total_replicas: usize,
    pub under_replicated: Vec<ChunkId>,
}

/// Metadata-side orchestration of uploads and deletes.
pub struct UploadCoordinator {
    store: Arc<dyn MetadataStore>,
    leases: LeaseManager,
    nodes: NodeClient,
    metrics: Arc<MetadataMetrics>,
    config: Arc<DfsConfig>,
    /// Write leases held from upload-init until commit, by file id.
    pending: Mutex<HashMap<FileId, Lease>>,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        leases: LeaseManager,
        nodes: NodeClient,
        metrics: Arc<MetadataMetrics>,
        config: Arc<DfsConfig>,
    ) -> Self {
        Self {
            store,
            leases,
            nodes,
            metrics,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Phase 1: lease, plan, create the planned file row.
    ///
    /// # Errors
    /// - `Conflict`: lease held or path taken
    /// - `InsufficientNodes`: fewer active nodes than the factor
    /// - `ConfigurationFailure`: invalid chunk size or path
    pub async fn upload_init(
        &self,
        raw_path: &str,
        size: u64,
        chunk_size: Option<u64>,
    ) -> Result<(FileId, Vec<ChunkPlan>), DfsError> {
        let path = VirtualPath::parse(raw_path)?;
        let chunk_size = match chunk_size {
            Some(bytes) => ChunkSize::new(bytes)?,
            None => self.config.chunk_size(),
        };

        info!("Upload init: {} ({} bytes, chunks of {})", path, size, chunk_size);

        let guard = match self
            .leases
            .acquire(&path, LeaseOperation::Write, None, None)
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                if matches!(e, DfsError::Conflict(_)) {
                    self.metrics.lease_conflicts_total.inc();
                }
                return Err(e);
            }
        };

        let result: Result<(FileId, Vec<ChunkPlan>), DfsError> = async {
            let active = self
                .store
                .active_nodes(self.config.node_timeout(), Utc::now())
                .await?;

            let plans = plan_placement(size, chunk_size, self.config.replication_factor, &active)?;
            let entries = plans.iter().map(|p| p.to_entry()).collect();

            let file = FileMetadata::planned(path.clone(), size, entries, Utc::now());
            file.validate()?;
            self.store.insert_file(&file).await?;

            Ok((file.file_id, plans))
        }
        .await;

        match result {
            Ok((file_id, plans)) => {
                // The lease outlives this call; commit releases it.
                let lease = guard.persist();
                self.pending.lock().await.insert(file_id, lease);
                self.metrics.uploads_initiated_total.inc();
                info!("Upload planned: {} -> {} ({} chunks)", path, file_id, plans.len());
                Ok((file_id, plans))
            }
            Err(e) => {
                // Failed init gives the path back immediately.
                let _ = guard.release().await;
                Err(e)
            }
        }
    }

    /// Phase 3: atomic single-row commit, lease released on every exit.
    pub async fn commit(
        &self,
        file_id: FileId,
        commits: &[ChunkCommit],
    ) -> Result<CommitOutcome, DfsError> {
        let result = self.store.commit_file(file_id, commits, Utc::now()).await;

        // Release regardless of success: a rejected commit must not leave
        // the path locked until TTL expiry.
        if let Some(lease) = self.pending.lock().await.remove(&file_id) {
            let _ = self.leases.release(lease.lease_id).await;
        }

        let file = match result {
            Ok(file) => file,
            Err(e) => {
                self.metrics.commit_failures_total.inc();
                return Err(e);
            }
        };

        let factor = self.config.replication_factor;
        let under_replicated: Vec<ChunkId> = commits
            .iter()
            .filter(|c| c.nodes.len() < factor)
            .map(|c| c.chunk_id)
            .collect();
        let total_replicas: usize = commits.iter().map(|c| c.nodes.len()).sum();

        if !under_replicated.is_empty() {
            self.metrics.under_replicated_commits_total.inc();
            warn!(
                "Commit of {} accepted with {} under-replicated chunk(s); reconciler will restore factor {}",
                file.path,
                under_replicated.len(),
                factor
            );
        }
        self.metrics.commits_total.inc();
        info!(
            "Commit ok: {} ({} chunks, {} replicas)",
            file.path,
            commits.len(),
            total_replicas
        );

        Ok(CommitOutcome {
            file,
            total_replicas,
            under_replicated,
        })
    }

    /// Soft- or hard-deletes a path under the delete lease. Hard deletion
    /// also clears the chunks off their storage nodes, best-effort.
    pub async fn delete(&self, raw_path: &str, permanent: bool) -> Result<bool, DfsError> {
        let path = VirtualPath::parse(raw_path)?;
        let guard = self
            .leases
            .acquire(&path, LeaseOperation::Delete, None, None)
            .await?;

        let result: Result<(bool, Vec<(ChunkId, Vec<String>)>), DfsError> = async {
            // Replica placement must be read before the rows disappear;
            // soft-deleted generations of the path are cleared too.
            let doomed: Vec<(ChunkId, Vec<String>)> = if permanent {
                self.store
                    .get_files_by_path_all(&path)
                    .await?
                    .iter()
                    .flat_map(|file| {
                        file.chunks.iter().map(|c| {
                            (
                                c.chunk_id,
                                c.replicas.iter().map(|r| r.url.clone()).collect::<Vec<_>>(),
                            )
                        })
                    })
                    .collect()
            } else {
                Vec::new()
            };

            let deleted = self.store.delete_file(&path, permanent, Utc::now()).await?;
            Ok((deleted, doomed))
        }
        .await;

        let _ = guard.release().await;

        let (deleted, doomed) = result?;
        if deleted {
            self.metrics.deletes_total.inc();
        }

        // Storage cleanup happens outside the lease and outside any store
        // lock; failures leave orphans that are invisible to metadata.
        let timeout = self.config.repair_timeout();
        let deletions = doomed.into_iter().flat_map(|(chunk_id, urls)| {
            let nodes = self.nodes.clone();
            urls.into_iter()
                .filter(|url| !url.is_empty())
                .map(move |url| {
                    let nodes = nodes.clone();
                    async move {
                        match nodes.delete_chunk(&url, chunk_id, timeout).await {
                            Ok(_) => debug!("Deleted chunk {} from {}", chunk_id, url),
                            Err(e) => {
                                warn!("Could not delete chunk {} from {}: {}", chunk_id, url, e)
                            }
                        }
                    }
                })
        });
        futures::future::join_all(deletions).await;

        Ok(deleted)
    }

    /// Write leases currently held between init and commit (observability).
    pub async fn pending_uploads(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use replifs_domain::HeartbeatSample;

    use crate::infrastructure::repositories::SqliteMetadataStore;

    async fn coordinator_with_nodes(node_count: usize) -> (Arc<SqliteMetadataStore>, UploadCoordinator) {
        let store = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
        let now = Utc::now();
        for i in 0..node_count {
            let hb = HeartbeatSample {
                node_id: format!("node-{}", i),
                url: Some(format!("http://node-{}:8001", i)),
                free_space: 1000 + i as u64,
                total_space: 10_000,
                chunk_ids: vec![],
                overlay_address: None,
                overlay_peer_id: None,
            };
            store.apply_heartbeat(&hb, Duration::seconds(60), now).await.unwrap();
        }

        let config = Arc::new(DfsConfig::default());
        let leases = LeaseManager::new(
            store.clone(),
            config.lease_ttl(),
            config.lease_sweep_interval(),
        );
        let coordinator = UploadCoordinator::new(
            store.clone(),
            leases,
            NodeClient::new(),
            Arc::new(MetadataMetrics::new().unwrap()),
            config,
        );
        (store, coordinator)
    }

    fn commits_for(plans: &[ChunkPlan]) -> Vec<ChunkCommit> {
        plans
            .iter()
            .map(|p| ChunkCommit {
                chunk_id: p.chunk_id,
                checksum: "cd".repeat(32),
                nodes: p.targets.iter().map(|t| t.node_id.clone()).collect(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_init_commit_flow() {
        let (store, coordinator) = coordinator_with_nodes(3).await;

        let (file_id, plans) = coordinator
            .upload_init("/flow/file.bin", 150 * 1024 * 1024, None)
            .await
            .unwrap();
        assert_eq!(plans.len(), 3); // 150 MiB at 64 MiB chunks
        assert_eq!(plans[0].targets.len(), 3);

        let outcome = coordinator.commit(file_id, &commits_for(&plans)).await.unwrap();
        assert_eq!(outcome.total_replicas, 9);
        assert!(outcome.under_replicated.is_empty());

        let file = store.get_file_by_id(file_id).await.unwrap().unwrap();
        assert!(file.chunks.iter().all(|c| c.checksum.is_some()));
        assert_eq!(coordinator.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_init_same_path_conflicts() {
        let (_store, coordinator) = coordinator_with_nodes(3).await;

        let (_file_id, _plans) = coordinator.upload_init("/x", 1024, None).await.unwrap();
        let err = coordinator.upload_init("/x", 1024, None).await.unwrap_err();
        assert!(matches!(err, DfsError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_commit_releases_lease_for_next_writer() {
        let (_store, coordinator) = coordinator_with_nodes(3).await;

        let (file_id, plans) = coordinator.upload_init("/y", 1024, None).await.unwrap();
        coordinator.commit(file_id, &commits_for(&plans)).await.unwrap();

        // Path row exists, so re-init conflicts on the path, not the lease.
        let err = coordinator.upload_init("/y", 1024, None).await.unwrap_err();
        assert!(matches!(err, DfsError::Conflict(_)));

        // After delete the path is reusable.
        assert!(coordinator.delete("/y", false).await.unwrap());
        coordinator.upload_init("/y", 1024, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_init_releases_lease() {
        // Only 2 nodes for factor 3: planning fails after the lease grab.
        let (_store, coordinator) = coordinator_with_nodes(2).await;

        let err = coordinator.upload_init("/z", 1024, None).await.unwrap_err();
        assert!(matches!(err, DfsError::InsufficientNodes(_)));

        // Lease was returned: the next failure is again about nodes, not
        // about a held lease.
        let err = coordinator.upload_init("/z", 1024, None).await.unwrap_err();
        assert!(matches!(err, DfsError::InsufficientNodes(_)));
    }

    #[tokio::test]
    async fn test_zero_byte_upload_commits_empty() {
        let (store, coordinator) = coordinator_with_nodes(3).await;

        let (file_id, plans) = coordinator.upload_init("/empty", 0, None).await.unwrap();
        assert!(plans.is_empty());

        let outcome = coordinator.commit(file_id, &[]).await.unwrap();
        assert_eq!(outcome.total_replicas, 0);

        let file = store.get_file_by_id(file_id).await.unwrap().unwrap();
        assert_eq!(file.size, 0);
        assert!(file.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_under_replicated_commit_succeeds_with_warning() {
        let (_store, coordinator) = coordinator_with_nodes(3).await;

        let (file_id, plans) = coordinator.upload_init("/short", 1024, None).await.unwrap();
        let mut commits = commits_for(&plans);
        commits[0].nodes.truncate(1);

        let outcome = coordinator.commit(file_id, &commits).await.unwrap();
        assert_eq!(outcome.under_replicated, vec![commits[0].chunk_id]);
        assert_eq!(outcome.total_replicas, 1);
    }

    #[tokio::test]
    async fn test_plan_mismatch_commit_rejected_and_lease_released() {
        let (_store, coordinator) = coordinator_with_nodes(3).await;

        let (file_id, _plans) = coordinator.upload_init("/mismatch", 1024, None).await.unwrap();
        let bogus = vec![ChunkCommit {
            chunk_id: ChunkId::new(),
            checksum: "00".repeat(32),
            nodes: vec!["node-0".to_string()],
        }];
        let err = coordinator.commit(file_id, &bogus).await.unwrap_err();
        assert!(matches!(err, DfsError::InvalidRequest(_)));

        // The failed commit released the write lease; delete can proceed.
        assert!(coordinator.delete("/mismatch", false).await.unwrap());
    }
}
