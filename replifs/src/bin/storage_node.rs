// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Node Binary
//!
//! Composition root for one storage node: the chunk store, a stable node
//! identity (flag, environment, or a `node_id` file persisted in the
//! storage directory), optional bootstrap registration, the heartbeat
//! reporter, the optional scrub sweep, and the HTTP listener.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use replifs::application::HeartbeatReporter;
use replifs::infrastructure::config::DfsConfig;
use replifs::infrastructure::http::{MetadataClient, NodeClient};
use replifs::infrastructure::metrics::NodeMetrics;
use replifs::infrastructure::storage::ChunkStore;
use replifs::presentation::{node, NodeServices};
use replifs_bootstrap::cli::validate_listen_addr;
use replifs_bootstrap::shutdown::CancellationToken;
use replifs_bootstrap::{init_tracing, wait_for_interrupt, NodeArgs, ShutdownCoordinator};
use replifs_domain::NodeRegistration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = NodeArgs::parse();
    init_tracing("replifs-node", args.verbose);

    let mut config = DfsConfig::from_env().context("load configuration")?;
    if let Some(listen) = args.listen {
        validate_listen_addr(&listen).map_err(anyhow::Error::msg)?;
        config.node_listen = listen;
    }
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(node_id) = args.node_id {
        config.node_id = Some(node_id);
    }
    if let Some(url) = args.metadata_url {
        config.metadata_url = url;
    }
    if let Some(url) = args.public_url {
        config.public_url = Some(url);
    }
    config.validate().context("validate configuration")?;
    let config = Arc::new(config);

    let chunk_store = Arc::new(
        ChunkStore::open(config.storage_dir.clone())
            .await
            .context("open chunk store")?,
    );
    let node_id = resolve_node_id(&config, chunk_store.root()).await?;
    let public_url = config.node_public_url();

    info!(
        "Starting storage node {} on {} (storage {:?}, metadata {})",
        node_id, config.node_listen, config.storage_dir, config.metadata_url
    );

    let metrics = Arc::new(NodeMetrics::new().context("build metrics")?);
    let metadata = MetadataClient::new(config.metadata_url.clone());

    // Bootstrap registration ahead of the first heartbeat; failure is not
    // fatal because the first heartbeat creates the node row anyway.
    let info = chunk_store.storage_info().await;
    let registration = NodeRegistration {
        node_id: node_id.clone(),
        url: Some(public_url.clone()),
        rack: config.rack.clone(),
        total_space: info.total_space,
        overlay_address: config.overlay_address.clone(),
        overlay_peer_id: config.overlay_peer_id.clone(),
        bootstrap_token: config.bootstrap_token.clone(),
    };
    match metadata.register(&registration, config.heartbeat_timeout()).await {
        Ok(_) => info!("Registered with metadata service"),
        Err(e) => warn!("Registration failed (heartbeat will register): {}", e),
    }

    let reporter = HeartbeatReporter::new(
        node_id.clone(),
        public_url,
        config.overlay_address.clone(),
        config.overlay_peer_id.clone(),
        chunk_store.clone(),
        metadata,
        metrics.clone(),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
    );

    let services = Arc::new(NodeServices {
        chunk_store: chunk_store.clone(),
        node_id,
        nodes: NodeClient::new(),
        metrics: metrics.clone(),
        config: config.clone(),
    });

    let shutdown = ShutdownCoordinator::default();

    let reporter_handle = {
        let token = shutdown.token();
        tokio::spawn(async move { reporter.run(token).await })
    };
    let scrub_handle = config.scrub_interval().map(|interval| {
        let token = shutdown.token();
        let store = chunk_store.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move { run_scrub(store, metrics, interval, token).await })
    });

    let listener = tokio::net::TcpListener::bind(&config.node_listen)
        .await
        .with_context(|| format!("bind {}", config.node_listen))?;
    info!("Storage node listening on {}", listener.local_addr()?);

    let server_token = shutdown.token();
    axum::serve(listener, node::router(services))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = wait_for_interrupt() => {}
                _ = server_token.cancelled() => {}
            }
        })
        .await
        .context("serve")?;

    shutdown.initiate_shutdown();
    let waiter = shutdown.clone();
    tokio::spawn(async move {
        let _ = reporter_handle.await;
        if let Some(handle) = scrub_handle {
            let _ = handle.await;
        }
        waiter.complete_shutdown();
    });
    shutdown.wait_for_shutdown().await;

    info!("Storage node stopped");
    Ok(())
}

/// Stable node identity: explicit config wins, then the `node_id` file in
/// the storage dir, else a generated id persisted there for next start.
async fn resolve_node_id(config: &DfsConfig, storage_dir: &Path) -> anyhow::Result<String> {
    if let Some(id) = &config.node_id {
        return Ok(id.clone());
    }

    let id_path = storage_dir.join("node_id");
    match tokio::fs::read_to_string(&id_path).await {
        Ok(content) => {
            let id = content.trim().to_string();
            if !id.is_empty() {
                return Ok(id);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("read node_id file"),
    }

    let id = format!("node-{}", uuid::Uuid::new_v4());
    tokio::fs::write(&id_path, &id).await.context("persist node_id")?;
    info!("Generated node id {} (persisted to {:?})", id, id_path);
    Ok(id)
}

/// Periodic integrity sweep; corrupt chunks are reported, never deleted.
async fn run_scrub(
    store: Arc<ChunkStore>,
    metrics: Arc<NodeMetrics>,
    interval: std::time::Duration,
    token: CancellationToken,
) {
    info!("Scrub sweep enabled (every {:?})", interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match store.scrub().await {
            Ok(corrupted) => metrics.scrub_corruptions_total.inc_by(corrupted.len() as u64),
            Err(e) => warn!("Scrub sweep failed: {}", e),
        }
    }
}
