// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Prometheus metrics of the metadata service: the coordination-layer
//! counters an operator needs to see convergence (heartbeats folded,
//! replicas pruned, repairs attempted).

use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use replifs_domain::DfsError;

const NAMESPACE: &str = "replifs_metadata";

/// Typed handle over the metadata service registry.
pub struct MetadataMetrics {
    registry: Arc<Registry>,

    pub uploads_initiated_total: IntCounter,
    pub commits_total: IntCounter,
    pub commit_failures_total: IntCounter,
    pub under_replicated_commits_total: IntCounter,
    pub deletes_total: IntCounter,
    pub heartbeats_total: IntCounter,
    pub replicas_added_total: IntCounter,
    pub replicas_pruned_total: IntCounter,
    pub repair_attempts_total: IntCounter,
    pub repair_successes_total: IntCounter,
    pub repair_failures_total: IntCounter,
    pub rebalance_tasks_total: IntCounter,
    pub lease_conflicts_total: IntCounter,
    pub api_errors_total: IntCounterVec,
    pub active_nodes: IntGauge,
}

impl MetadataMetrics {
    pub fn new() -> Result<Self, DfsError> {
        let registry = Registry::new();

        let uploads_initiated_total = counter("uploads_initiated_total", "Upload plans handed out")?;
        let commits_total = counter("commits_total", "Successful file commits")?;
        let commit_failures_total = counter("commit_failures_total", "Rejected or failed commits")?;
        let under_replicated_commits_total = counter(
            "under_replicated_commits_total",
            "Commits accepted with fewer replicas than the factor",
        )?;
        let deletes_total = counter("deletes_total", "File delete operations")?;
        let heartbeats_total = counter("heartbeats_total", "Heartbeats folded into metadata")?;
        let replicas_added_total =
            counter("replicas_added_total", "Replicas learned from heartbeats")?;
        let replicas_pruned_total = counter(
            "replicas_pruned_total",
            "Replicas removed because a heartbeat stopped reporting them",
        )?;
        let repair_attempts_total = counter("repair_attempts_total", "Repair copies attempted")?;
        let repair_successes_total = counter("repair_successes_total", "Repair copies confirmed")?;
        let repair_failures_total = counter("repair_failures_total", "Repair copies failed")?;
        let rebalance_tasks_total = counter("rebalance_tasks_total", "Rebalance tasks enqueued")?;
        let lease_conflicts_total = counter("lease_conflicts_total", "Lease acquisitions refused")?;

        let api_errors_total = IntCounterVec::new(
            Opts::new("api_errors_total", "API errors by kind").namespace(NAMESPACE),
            &["kind"],
        )
        .map_err(metric_err)?;

        let active_nodes = IntGauge::with_opts(
            Opts::new("active_nodes", "Nodes with a fresh heartbeat").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;

        for collector in [
            Box::new(uploads_initiated_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(commits_total.clone()),
            Box::new(commit_failures_total.clone()),
            Box::new(under_replicated_commits_total.clone()),
            Box::new(deletes_total.clone()),
            Box::new(heartbeats_total.clone()),
            Box::new(replicas_added_total.clone()),
            Box::new(replicas_pruned_total.clone()),
            Box::new(repair_attempts_total.clone()),
            Box::new(repair_successes_total.clone()),
            Box::new(repair_failures_total.clone()),
            Box::new(rebalance_tasks_total.clone()),
            Box::new(lease_conflicts_total.clone()),
            Box::new(api_errors_total.clone()),
            Box::new(active_nodes.clone()),
        ] {
            registry.register(collector).map_err(metric_err)?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            uploads_initiated_total,
            commits_total,
            commit_failures_total,
            under_replicated_commits_total,
            deletes_total,
            heartbeats_total,
            replicas_added_total,
            replicas_pruned_total,
            repair_attempts_total,
            repair_successes_total,
            repair_failures_total,
            rebalance_tasks_total,
            lease_conflicts_total,
            api_errors_total,
            active_nodes,
        })
    }

    pub fn record_api_error(&self, kind: &str) {
        self.api_errors_total.with_label_values(&[kind]).inc();
    }

    /// Prometheus text exposition of this registry.
    pub fn render(&self) -> Result<String, DfsError> {
        super::render(&self.registry)
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounter, DfsError> {
    IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE)).map_err(metric_err)
}

fn metric_err(e: prometheus::Error) -> DfsError {
    DfsError::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = MetadataMetrics::new().unwrap();
        metrics.heartbeats_total.inc();
        metrics.replicas_pruned_total.inc_by(3);
        metrics.record_api_error("conflict");

        let text = metrics.render().unwrap();
        assert!(text.contains("replifs_metadata_heartbeats_total 1"));
        assert!(text.contains("replifs_metadata_replicas_pruned_total 3"));
        assert!(text.contains("kind=\"conflict\""));
    }
}
