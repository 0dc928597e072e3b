// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Common Test Helpers
//!
//! An in-process cluster for the integration and end-to-end suites: one
//! metadata service plus N storage nodes, all on ephemeral localhost ports
//! with tempdir chunk storage and an in-memory SQLite metadata store.
//! Heartbeats run at 200ms so convergence tests finish in well under a
//! second per cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use replifs::application::{
    DfsClient, HeartbeatReporter, LeaseManager, ReplicaReconciler, UploadCoordinator,
};
use replifs::infrastructure::config::DfsConfig;
use replifs::infrastructure::http::{MetadataClient, NodeClient};
use replifs::infrastructure::metrics::{MetadataMetrics, NodeMetrics};
use replifs::infrastructure::repositories::SqliteMetadataStore;
use replifs::infrastructure::storage::ChunkStore;
use replifs::presentation::{metadata, node, MetadataServices, NodeServices};
use replifs_bootstrap::shutdown::CancellationToken;
use replifs_domain::MetadataStore;

/// Heartbeat cadence inside tests.
pub const TEST_HEARTBEAT: Duration = Duration::from_millis(200);

/// One storage node of the test cluster.
pub struct TestNode {
    pub node_id: String,
    pub url: String,
    pub chunk_store: Arc<ChunkStore>,
    #[allow(dead_code)]
    dir: TempDir,
    token: CancellationToken,
    server: JoinHandle<()>,
    reporter: JoinHandle<()>,
    alive: bool,
}

impl TestNode {
    /// Simulates node death: stop serving and stop heartbeating. Chunk
    /// files stay on disk, as they would on a crashed host.
    pub fn kill(&mut self) {
        self.token.cancel();
        self.server.abort();
        self.reporter.abort();
        self.alive = false;
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// In-process cluster: metadata service + storage nodes.
pub struct TestCluster {
    pub config: Arc<DfsConfig>,
    pub store: Arc<SqliteMetadataStore>,
    pub metadata_url: String,
    pub nodes: Vec<TestNode>,
    pub reconciler: ReplicaReconciler,
    #[allow(dead_code)]
    metadata_server: JoinHandle<()>,
    metadata_token: CancellationToken,
}

impl TestCluster {
    /// Starts a cluster and waits until every node's first heartbeat made
    /// it active.
    pub async fn start(node_count: usize, replication_factor: usize) -> Self {
        let config = Arc::new(DfsConfig {
            replication_factor,
            heartbeat_interval: 1,
            node_timeout: 2,
            check_interval: 1,
            ..DfsConfig::default()
        });

        let store = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
        let store_dyn: Arc<dyn MetadataStore> = store.clone();

        let metrics = Arc::new(MetadataMetrics::new().unwrap());
        let node_client = NodeClient::new();
        let leases = LeaseManager::new(
            store_dyn.clone(),
            config.lease_ttl(),
            config.lease_sweep_interval(),
        );
        let coordinator = UploadCoordinator::new(
            store_dyn.clone(),
            leases.clone(),
            node_client.clone(),
            metrics.clone(),
            config.clone(),
        );
        let reconciler = ReplicaReconciler::new(
            store_dyn.clone(),
            node_client.clone(),
            metrics.clone(),
            config.clone(),
        );

        let services = Arc::new(MetadataServices {
            store: store_dyn,
            coordinator,
            leases,
            nodes: node_client,
            metrics,
            config: config.clone(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let metadata_url = format!("http://{}", listener.local_addr().unwrap());
        let metadata_token = CancellationToken::new();
        let shutdown = metadata_token.clone();
        let metadata_server = tokio::spawn(async move {
            let _ = axum::serve(listener, metadata::router(services))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
        });

        let mut cluster = Self {
            config,
            store,
            metadata_url,
            nodes: Vec::new(),
            reconciler,
            metadata_server,
            metadata_token,
        };
        for _ in 0..node_count {
            cluster.add_node().await;
        }
        cluster.wait_active_nodes(node_count).await;
        cluster
    }

    /// Spawns one more storage node (server + heartbeat reporter).
    pub async fn add_node(&mut self) -> &TestNode {
        let dir = TempDir::new().unwrap();
        let chunk_store = Arc::new(ChunkStore::open(dir.path()).await.unwrap());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{}", addr);
        let node_id = format!("node-{}", addr.port());

        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let services = Arc::new(NodeServices {
            chunk_store: chunk_store.clone(),
            node_id: node_id.clone(),
            nodes: NodeClient::new(),
            metrics: metrics.clone(),
            config: self.config.clone(),
        });

        let token = CancellationToken::new();
        let shutdown = token.clone();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, node::router(services))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
        });

        let reporter = HeartbeatReporter::new(
            node_id.clone(),
            url.clone(),
            None,
            None,
            chunk_store.clone(),
            MetadataClient::new(self.metadata_url.clone()),
            metrics,
            TEST_HEARTBEAT,
            Duration::from_secs(5),
        );
        let reporter_token = token.clone();
        let reporter = tokio::spawn(async move { reporter.run(reporter_token).await });

        self.nodes.push(TestNode {
            node_id,
            url,
            chunk_store,
            dir,
            token,
            server,
            reporter,
            alive: true,
        });
        self.nodes.last().unwrap()
    }

    /// A client wired to this cluster's metadata service.
    pub fn client(&self) -> DfsClient {
        DfsClient::new(self.metadata_url.clone())
    }

    /// Kills the node at `index` (stops serving and heartbeating).
    pub fn kill_node(&mut self, index: usize) {
        self.nodes[index].kill();
    }

    /// Blocks until exactly `expected` nodes are active.
    pub async fn wait_active_nodes(&self, expected: usize) {
        let store = self.store.clone();
        let timeout = self.config.node_timeout();
        wait_for(Duration::from_secs(10), || {
            let store = store.clone();
            async move {
                store
                    .active_nodes(timeout, chrono::Utc::now())
                    .await
                    .map(|nodes| nodes.len() == expected)
                    .unwrap_or(false)
            }
        })
        .await
        .unwrap_or_else(|| panic!("never reached {} active node(s)", expected));
    }

    /// Stops everything still running.
    pub fn shutdown(&mut self) {
        for node in &mut self.nodes {
            if node.alive {
                node.kill();
            }
        }
        self.metadata_token.cancel();
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Polls `condition` every 50ms until it returns true or the deadline
/// passes. Returns `Some(())` on success.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> Option<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return Some(());
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// SHA-256 as lowercase hex, for independent verification in scenarios.
pub fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
