// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Service Configuration
//!
//! Centralized configuration for both replifs services, loaded from
//! environment variables with the `DFS_` prefix (e.g. `DFS_CHUNK_SIZE`,
//! `DFS_REPLICATION_FACTOR`). Every knob has a serde default, so a bare
//! environment yields a working single-host setup; CLI flags override
//! individual fields in the composition roots.
//!
//! Timeouts follow the deadline table of the coordination protocol:
//! pipeline writes 120s per chunk, repair copies 60s, heartbeats 10s,
//! health probes 5s.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use replifs_domain::{ChunkSize, DfsError};

/// Which database backs the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    Sqlite,
    Postgres,
}

/// Placement-balance criterion used by the reconciler when rebalancing is
/// enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceStrategy {
    Variance,
    Load,
    Rack,
    Hybrid,
}

/// Configuration shared by the metadata service, the storage nodes, and the
/// client CLI. Loaded once at startup; immutable afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DfsConfig {
    // Addresses
    /// Listen address of the metadata service.
    pub metadata_listen: String,
    /// Listen address of a storage node.
    pub node_listen: String,
    /// Base URL clients and nodes use to reach the metadata service.
    pub metadata_url: String,
    /// Public base URL of this storage node; derived from `node_listen`
    /// when unset.
    pub public_url: Option<String>,

    // Storage node
    /// Directory holding `{chunk_id}.chunk` / `{chunk_id}.checksum` files.
    pub storage_dir: PathBuf,
    /// Explicit node identity; normally persisted under the storage dir.
    pub node_id: Option<String>,
    /// Scrub sweep interval in seconds; 0 disables scrubbing.
    pub scrub_interval: u64,

    // Chunking and replication
    /// Chunk size in bytes (64 MiB default).
    pub chunk_size: u64,
    /// Desired committed replicas per chunk.
    pub replication_factor: usize,

    // Periodic task intervals (seconds)
    pub heartbeat_interval: u64,
    /// Heartbeats older than this mark the node inactive.
    pub node_timeout: u64,
    /// Reconciler loop period.
    pub check_interval: u64,
    /// Default lease TTL.
    pub lease_ttl: u64,

    // Rebalancing
    pub enable_rebalancing: bool,
    pub rebalance_strategy: RebalanceStrategy,
    /// Cap on priority-2 (rebalance) tasks per reconciler cycle.
    pub rebalance_cap: usize,

    // Metadata persistence
    pub metadata_backend: MetadataBackend,
    /// SQLite path URL or PostgreSQL DSN, depending on the backend.
    pub database_url: String,

    // Security
    /// Shared secret required by `POST /api/v1/nodes/register`.
    pub bootstrap_token: Option<String>,

    // Outbound deadlines (seconds)
    pub pipeline_timeout: u64,
    pub repair_timeout: u64,
    pub heartbeat_timeout: u64,
    pub health_timeout: u64,

    // Overlay metadata forwarded in heartbeats (deployment concern; the
    // core never interprets these beyond address preference)
    pub overlay_address: Option<String>,
    pub overlay_peer_id: Option<String>,
    /// Rack label reported at registration.
    pub rack: Option<String>,
}

impl Default for DfsConfig {
    fn default() -> Self {
        Self {
            metadata_listen: "0.0.0.0:8000".to_string(),
            node_listen: "0.0.0.0:8001".to_string(),
            metadata_url: "http://localhost:8000".to_string(),
            public_url: None,
            storage_dir: PathBuf::from("./replifs-data"),
            node_id: None,
            scrub_interval: 0,
            chunk_size: ChunkSize::DEFAULT_SIZE,
            replication_factor: 3,
            heartbeat_interval: 10,
            node_timeout: 60,
            check_interval: 30,
            lease_ttl: 300,
            enable_rebalancing: false,
            rebalance_strategy: RebalanceStrategy::Hybrid,
            rebalance_cap: 8,
            metadata_backend: MetadataBackend::Sqlite,
            database_url: "sqlite://replifs-metadata.db".to_string(),
            bootstrap_token: None,
            pipeline_timeout: 120,
            repair_timeout: 60,
            heartbeat_timeout: 10,
            health_timeout: 5,
            overlay_address: None,
            overlay_peer_id: None,
            rack: None,
        }
    }
}

impl DfsConfig {
    /// Loads configuration from `DFS_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> Result<Self, DfsError> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("DFS"))
            .build()
            .map_err(|e| DfsError::ConfigurationFailure(e.to_string()))?;

        let parsed: DfsConfig = cfg
            .try_deserialize()
            .map_err(|e| DfsError::ConfigurationFailure(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Cross-field sanity checks.
    pub fn validate(&self) -> Result<(), DfsError> {
        ChunkSize::new(self.chunk_size)?;
        if self.replication_factor == 0 {
            return Err(DfsError::ConfigurationFailure(
                "replication_factor must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval == 0 || self.node_timeout == 0 || self.check_interval == 0 {
            return Err(DfsError::ConfigurationFailure(
                "intervals must be non-zero".to_string(),
            ));
        }
        if self.node_timeout < self.heartbeat_interval {
            return Err(DfsError::ConfigurationFailure(format!(
                "node_timeout ({}) must be at least heartbeat_interval ({})",
                self.node_timeout, self.heartbeat_interval
            )));
        }
        if self.lease_ttl == 0 {
            return Err(DfsError::ConfigurationFailure("lease_ttl must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn chunk_size(&self) -> ChunkSize {
        // Validated at load time.
        ChunkSize::new(self.chunk_size).unwrap_or_default()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn node_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.node_timeout as i64)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl as i64)
    }

    /// Lease sweeper period: half the TTL, capped at 30s.
    pub fn lease_sweep_interval(&self) -> Duration {
        Duration::from_secs((self.lease_ttl / 2).clamp(1, 30))
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout)
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_secs(self.repair_timeout)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout)
    }

    pub fn scrub_interval(&self) -> Option<Duration> {
        (self.scrub_interval > 0).then(|| Duration::from_secs(self.scrub_interval))
    }

    /// Public URL of the storage node: explicit override or derived from
    /// the listen address (with `0.0.0.0` swapped for `localhost`).
    pub fn node_public_url(&self) -> String {
        if let Some(url) = &self.public_url {
            return url.trim_end_matches('/').to_string();
        }
        let addr = self.node_listen.replace("0.0.0.0", "localhost");
        format!("http://{}", addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = DfsConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.chunk_size, 64 * 1024 * 1024);
        assert_eq!(cfg.replication_factor, 3);
        assert_eq!(cfg.heartbeat_interval, 10);
        assert_eq!(cfg.node_timeout, 60);
        assert_eq!(cfg.check_interval, 30);
        assert!(!cfg.enable_rebalancing);
    }

    #[test]
    fn test_validation_rejects_zero_factor() {
        let cfg = DfsConfig {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_timeout_below_interval() {
        let cfg = DfsConfig {
            heartbeat_interval: 30,
            node_timeout: 10,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_lease_sweep_interval_is_bounded() {
        let cfg = DfsConfig::default();
        assert_eq!(cfg.lease_sweep_interval(), Duration::from_secs(30));

        let short = DfsConfig {
            lease_ttl: 20,
            ..Default::default()
        };
        assert_eq!(short.lease_sweep_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_node_public_url_derivation() {
        let cfg = DfsConfig::default();
        assert_eq!(cfg.node_public_url(), "http://localhost:8001");

        let explicit = DfsConfig {
            public_url: Some("http://10.0.0.5:9001/".to_string()),
            ..Default::default()
        };
        assert_eq!(explicit.node_public_url(), "http://10.0.0.5:9001");
    }
}
