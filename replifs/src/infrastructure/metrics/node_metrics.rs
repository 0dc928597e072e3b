// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Prometheus metrics of a storage node.

use std::sync::Arc;

use prometheus::{IntCounter, IntGauge, Opts, Registry};

use replifs_domain::DfsError;

const NAMESPACE: &str = "replifs_node";

/// Typed handle over the storage node registry.
pub struct NodeMetrics {
    registry: Arc<Registry>,

    pub chunks_stored_total: IntCounter,
    pub bytes_stored_total: IntCounter,
    pub chunks_served_total: IntCounter,
    pub bytes_served_total: IntCounter,
    pub chunks_deleted_total: IntCounter,
    pub store_failures_total: IntCounter,
    pub checksum_failures_total: IntCounter,
    pub pipeline_forwards_total: IntCounter,
    pub pipeline_forward_failures_total: IntCounter,
    pub heartbeats_sent_total: IntCounter,
    pub heartbeat_failures_total: IntCounter,
    pub scrub_corruptions_total: IntCounter,
    pub chunk_count: IntGauge,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, DfsError> {
        let registry = Registry::new();

        let chunks_stored_total = counter("chunks_stored_total", "Chunks written to disk")?;
        let bytes_stored_total = counter("bytes_stored_total", "Uncompressed bytes written")?;
        let chunks_served_total = counter("chunks_served_total", "Chunk downloads served")?;
        let bytes_served_total = counter("bytes_served_total", "Uncompressed bytes served")?;
        let chunks_deleted_total = counter("chunks_deleted_total", "Chunks deleted")?;
        let store_failures_total = counter("store_failures_total", "Failed chunk writes")?;
        let checksum_failures_total =
            counter("checksum_failures_total", "Reads failing integrity verification")?;
        let pipeline_forwards_total =
            counter("pipeline_forwards_total", "Pipeline forwards attempted")?;
        let pipeline_forward_failures_total =
            counter("pipeline_forward_failures_total", "Pipeline forwards failed")?;
        let heartbeats_sent_total = counter("heartbeats_sent_total", "Heartbeats delivered")?;
        let heartbeat_failures_total =
            counter("heartbeat_failures_total", "Heartbeat delivery failures")?;
        let scrub_corruptions_total =
            counter("scrub_corruptions_total", "Corrupted chunks found by scrub")?;

        let chunk_count = IntGauge::with_opts(
            Opts::new("chunk_count", "Chunks currently on disk").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;

        for collector in [
            Box::new(chunks_stored_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(bytes_stored_total.clone()),
            Box::new(chunks_served_total.clone()),
            Box::new(bytes_served_total.clone()),
            Box::new(chunks_deleted_total.clone()),
            Box::new(store_failures_total.clone()),
            Box::new(checksum_failures_total.clone()),
            Box::new(pipeline_forwards_total.clone()),
            Box::new(pipeline_forward_failures_total.clone()),
            Box::new(heartbeats_sent_total.clone()),
            Box::new(heartbeat_failures_total.clone()),
            Box::new(scrub_corruptions_total.clone()),
            Box::new(chunk_count.clone()),
        ] {
            registry.register(collector).map_err(metric_err)?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            chunks_stored_total,
            bytes_stored_total,
            chunks_served_total,
            bytes_served_total,
            chunks_deleted_total,
            store_failures_total,
            checksum_failures_total,
            pipeline_forwards_total,
            pipeline_forward_failures_total,
            heartbeats_sent_total,
            heartbeat_failures_total,
            scrub_corruptions_total,
            chunk_count,
        })
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
