// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Heartbeat Reporter
//!
//! Per-node periodic task reporting liveness, capacity, and the exact set
//! of chunk ids on disk to the metadata service.
//!
//! The inventory is recomputed from the storage directory *immediately
//! before* each send; the heartbeat is the single source of truth about
//! what this node holds, so a cached or stale inventory would poison the
//! metadata's replica view.
//!
//! Transport failures are non-fatal: the reporter backs off exponentially
//! (doubling, capped at 60s) and resets to the configured interval on the
//! next success. Stop is cooperative through the shutdown token; the
//! in-flight send finishes within its own 10s deadline, well inside the 5s
//! grace the coordinator allows for the drain plus the bounded overshoot.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use replifs_bootstrap::shutdown::CancellationToken;
use replifs_domain::HeartbeatSample;

use crate::infrastructure::http::MetadataClient;
use crate::infrastructure::metrics::NodeMetrics;
use crate::infrastructure::storage::ChunkStore;

/// Backoff ceiling after repeated heartbeat failures.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Periodic heartbeat sender for one storage node.
pub struct HeartbeatReporter {
    node_id: String,
    public_url: String,
    overlay_address: Option<String>,
    overlay_peer_id: Option<String>,
    chunk_store: Arc<ChunkStore>,
    metadata: MetadataClient,
    metrics: Arc<NodeMetrics>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatReporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: String,
        public_url: String,
        overlay_address: Option<String>,
        overlay_peer_id: Option<String>,
        chunk_store: Arc<ChunkStore>,
        metadata: MetadataClient,
        metrics: Arc<NodeMetrics>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            public_url,
            overlay_address,
            overlay_peer_id,
            chunk_store,
            metadata,
            metrics,
            interval,
            timeout,
        }
    }

    /// Builds one heartbeat from current disk state.
    async fn sample(&self) -> HeartbeatSample {
        let info = self.chunk_store.storage_info().await;
        let chunk_ids = self.chunk_store.inventory().await.unwrap_or_else(|e| {
            warn!("Inventory scan failed, reporting empty: {}", e);
            Vec::new()
        });
        self.metrics.chunk_count.set(chunk_ids.len() as i64);

        HeartbeatSample {
            node_id: self.node_id.clone(),
            url: Some(self.public_url.clone()),
            free_space: info.free_space,
            total_space: info.total_space,
            chunk_ids,
            overlay_address: self.overlay_address.clone(),
            overlay_peer_id: self.overlay_peer_id.clone(),
        }
    }

    /// Runs until the token cancels. Never returns an error: heartbeat
    /// failure must not take the node down.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Heartbeat reporter started for {} (every {:?})",
            self.node_id, self.interval
        );
        let mut delay = self.interval;

        loop {
            let sample = self.sample().await;
            match self.metadata.heartbeat(&sample, self.timeout).await {
                Ok(_) => {
                    debug!(
                        "Heartbeat sent: {} ({} chunks)",
                        self.node_id,
                        sample.chunk_ids.len()
                    );
                    self.metrics.heartbeats_sent_total.inc();
                    delay = self.interval;
                }
                Err(e) => {
                    self.metrics.heartbeat_failures_total.inc();
                    delay = (delay * 2).min(MAX_BACKOFF);
                    // Jitter desynchronizes a fleet that lost the metadata
                    // service at the same instant.
                    let jitter = delay.mul_f64(rand::random::<f64>() * 0.1);
                    delay += jitter;
                    delay = delay.min(MAX_BACKOFF);
                    warn!(
                        "Heartbeat failed for {}: {} (next attempt in {:?})",
                        self.node_id, e, delay
                    );
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Heartbeat reporter stopped for {}", self.node_id);
    }
}
