// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Replica Reconciler
//!
//! Background loop that restores the replication factor after node loss
//! and, when enabled, nudges badly placed chunks toward balance.
//!
//! Each cycle pages through the non-deleted files, snapshots the active
//! fleet, and intersects every chunk's committed replicas with the active
//! node ids; the heartbeat-inventory half of replica health is already
//! folded into the rows by the metadata store, so health is a cheap set
//! intersection here.
//!
//! ## Repair Discipline
//!
//! - Under-replicated chunks are priority 1; balance moves are priority 2
//!   and capped per cycle. Priority 1 always executes first.
//! - Source: first healthy replica in node-id order (deterministic).
//! - Targets: the emptiest active non-holders, as many as the deficit.
//! - The copy is pull-then-push through the node Store endpoints with *no*
//!   pipeline tail. Metadata replica rows are **not** written here: the
//!   target's next heartbeat teaches the metadata the new placement, which
//!   keeps the heartbeat the single source of truth.
//! - Attempts are idempotent; partial success is fine; the loop converges
//!   across cycles. Iteration errors are logged, never fatal.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use replifs_bootstrap::shutdown::CancellationToken;
use replifs_domain::{ChunkId, DfsError, FileMetadata, MetadataStore, NodeInfo, ReplicaInfo, VirtualPath};

use crate::application::rebalance::violates_balance;
use crate::infrastructure::config::DfsConfig;
use crate::infrastructure::http::NodeClient;
use crate::infrastructure::metrics::MetadataMetrics;

/// File page size per reconcile cycle iteration.
const PAGE_SIZE: u32 = 500;

/// One chunk needing attention.
#[derive(Debug, Clone)]
pub struct RepairTask {
    /// 1 = under-replicated, 2 = balance move.
    pub priority: u8,
    pub path: VirtualPath,
    pub chunk_id: ChunkId,
    /// Healthy replicas usable as copy sources, node-id order.
    pub sources: Vec<ReplicaInfo>,
    /// How many new holders to create.
    pub needed: usize,
}

/// Counters from one reconcile cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub files_scanned: u64,
    pub under_replicated: u64,
    pub rebalance_enqueued: u64,
    pub copies_attempted: u64,
    pub copies_succeeded: u64,
    pub copies_failed: u64,
}

/// The background repair loop of the metadata service.
pub struct ReplicaReconciler {
    store: Arc<dyn MetadataStore>,
    nodes: NodeClient,
    metrics: Arc<MetadataMetrics>,
    config: Arc<DfsConfig>,
}

impl ReplicaReconciler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        nodes: NodeClient,
        metrics: Arc<MetadataMetrics>,
        config: Arc<DfsConfig>,
    ) -> Self {
        Self {
            store,
            nodes,
            metrics,
            config,
        }
    }

    /// Runs until cancelled. Per-iteration errors never terminate the loop.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Replica reconciler started (every {:?}, rebalancing {})",
            self.config.check_interval(),
            if self.config.enable_rebalancing { "on" } else { "off" }
        );
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval()) => {}
            }
            match self.run_once().await {
                Ok(stats) if stats.under_replicated > 0 || stats.rebalance_enqueued > 0 => {
                    info!(
                        "Reconcile cycle: {} under-replicated, {} balance task(s), {}/{} copies ok",
                        stats.under_replicated,
                        stats.rebalance_enqueued,
                        stats.copies_succeeded,
                        stats.copies_attempted
                    );
                }
                Ok(_) => debug!("Reconcile cycle: nothing to repair"),
                Err(e) => error!("Reconcile cycle failed: {}", e),
            }
        }
        info!("Replica reconciler stopped");
    }

    /// One full reconcile cycle. Public for tests and the e2e harness.
    pub async fn run_once(&self) -> Result<ReconcileStats, DfsError> {
        let now = Utc::now();
        let active = self
            .store
            .active_nodes(self.config.node_timeout(), now)
            .await?;
        self.metrics.active_nodes.set(active.len() as i64);

        let mut stats = ReconcileStats::default();
        let mut tasks: Vec<RepairTask> = Vec::new();
        let mut offset = 0u32;

        loop {
            let page = self.store.list_files(None, PAGE_SIZE, offset).await?;
            if page.is_empty() {
                break;
            }
            stats.files_scanned += page.len() as u64;
            let full_page = page.len() as u32 == PAGE_SIZE;

            let mut page_tasks = plan_repairs(
                &page,
                &active,
                self.config.replication_factor,
                self.config.enable_rebalancing,
                self.config.rebalance_strategy,
            );
            tasks.append(&mut page_tasks);

            if !full_page {
                break;
            }
            offset += PAGE_SIZE;
        }

        // Cap balance moves per cycle; repairs are never capped.
        let cap = self.config.rebalance_cap;
        let mut balance_seen = 0usize;
        tasks.retain(|t| {
            if t.priority == 1 {
                true
            } else {
                balance_seen += 1;
                balance_seen <= cap
            }
        });
        tasks.sort_by_key(|t| t.priority);

        for task in &tasks {
            match task.priority {
                1 => stats.under_replicated += 1,
                _ => {
                    stats.rebalance_enqueued += 1;
                    self.metrics.rebalance_tasks_total.inc();
                }
            }
        }

        for task in tasks {
            self.repair_chunk(&task, &active, &mut stats).await;
        }
        Ok(stats)
    }

    /// Repairs one chunk: pull from the first source, push to each target.
    /// Failures are logged and counted; the chunk is retried next cycle.
    async fn repair_chunk(&self, task: &RepairTask, active: &[NodeInfo], stats: &mut ReconcileStats) {
        let Some(source) = task.sources.first() else {
            error!(
                "Chunk {} of {} has no healthy replica left; cannot repair, data at risk",
                task.chunk_id, task.path
            );
            return;
        };

        let holder_ids: HashSet<&str> = task.sources.iter().map(|r| r.node_id.as_str()).collect();
        let targets: Vec<&NodeInfo> = active
            .iter()
            .filter(|n| !holder_ids.contains(n.node_id.as_str()))
            .take(task.needed)
            .collect();

        if targets.is_empty() {
            debug!(
                "Chunk {} of {} stays at {} replica(s): no eligible target nodes",
                task.chunk_id,
                task.path,
                task.sources.len()
            );
            return;
        }

        let timeout = self.config.repair_timeout();
        let fetched = match self.nodes.fetch_chunk(&source.url, task.chunk_id, timeout).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(
                    "Repair pull of chunk {} from {} failed: {}",
                    task.chunk_id, source.node_id, e
                );
                stats.copies_attempted += targets.len() as u64;
                stats.copies_failed += targets.len() as u64;
                self.metrics.repair_attempts_total.inc_by(targets.len() as u64);
                self.metrics.repair_failures_total.inc_by(targets.len() as u64);
                return;
            }
        };

        for target in targets {
            stats.copies_attempted += 1;
            self.metrics.repair_attempts_total.inc();

            match self
                .nodes
                .store_chunk(&target.url(), task.chunk_id, fetched.data.clone(), false, &[], timeout)
                .await
            {
                Ok(_) => {
                    stats.copies_succeeded += 1;
                    self.metrics.repair_successes_total.inc();
                    info!(
                        "Repaired chunk {} of {}: {} -> {}",
                        task.chunk_id, task.path, source.node_id, target.node_id
                    );
                    // No metadata write: the target's next heartbeat reports
                    // the chunk and the replica sync records it.
                }
                Err(e) => {
                    stats.copies_failed += 1;
                    self.metrics.repair_failures_total.inc();
                    warn!(
                        "Repair push of chunk {} to {} failed: {}",
                        task.chunk_id, target.node_id, e
                    );
                }
            }
        }
    }
}

/// Scans a page of files for chunks needing repair or rebalance. Pure:
/// exercised directly by unit tests.
pub fn plan_repairs(
    files: &[FileMetadata],
    active: &[NodeInfo],
    replication_factor: usize,
    enable_rebalancing: bool,
    strategy: crate::infrastructure::config::RebalanceStrategy,
) -> Vec<RepairTask> {
    let active_ids: HashSet<String> = active.iter().map(|n| n.node_id.clone()).collect();
    let mut tasks = Vec::new();

    for file in files {
        for chunk in &file.chunks {
            let healthy = chunk.healthy_replicas(&active_ids);
            let mut sources: Vec<ReplicaInfo> = healthy.into_iter().cloned().collect();
            sources.sort_by(|a, b| a.node_id.cmp(&b.node_id));

            if sources.len() < replication_factor {
                tasks.push(RepairTask {
                    priority: 1,
                    path: file.path.clone(),
                    chunk_id: chunk.chunk_id,
                    needed: replication_factor - sources.len(),
                    sources,
                });
            } else if enable_rebalancing && sources.len() == replication_factor {
                let holders: HashSet<String> = sources.iter().map(|r| r.node_id.clone()).collect();
                if violates_balance(strategy, &holders, active) {
                    tasks.push(RepairTask {
                        priority: 2,
                        path: file.path.clone(),
                        chunk_id: chunk.chunk_id,
                        needed: 1,
                        sources,
                    });
                }
            }
        }
    }
    tasks
}
