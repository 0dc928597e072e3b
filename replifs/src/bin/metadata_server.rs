// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metadata Service Binary
//!
//! Composition root: configuration, the metadata backend, the coordination
//! services, the periodic tasks (reconciler, lease sweeper), and the HTTP
//! listener. Shutdown follows the standard sequence; stop accepting
//! requests, cancel periodic tasks within the grace period, close the
//! store.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use replifs::application::{LeaseManager, ReplicaReconciler, UploadCoordinator};
use replifs::infrastructure::config::DfsConfig;
use replifs::infrastructure::http::NodeClient;
use replifs::infrastructure::metrics::MetadataMetrics;
use replifs::infrastructure::repositories::create_metadata_store;
use replifs::presentation::{metadata, MetadataServices};
use replifs_bootstrap::cli::validate_listen_addr;
use replifs_bootstrap::{init_tracing, wait_for_interrupt, MetadataArgs, ShutdownCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = MetadataArgs::parse();
    init_tracing("replifs-metadata", args.verbose);

    let mut config = DfsConfig::from_env().context("load configuration")?;
    if let Some(listen) = args.listen {
        validate_listen_addr(&listen).map_err(anyhow::Error::msg)?;
        config.metadata_listen = listen;
    }
    if let Some(backend) = args.backend {
        config.metadata_backend = match backend.as_str() {
            "sqlite" => replifs::infrastructure::config::MetadataBackend::Sqlite,
            "postgres" => replifs::infrastructure::config::MetadataBackend::Postgres,
            other => anyhow::bail!("unknown metadata backend '{}'", other),
        };
    }
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    config.validate().context("validate configuration")?;
    let config = Arc::new(config);

    info!(
        "Starting metadata service on {} ({:?} backend, replication factor {})",
        config.metadata_listen, config.metadata_backend, config.replication_factor
    );

    let store = create_metadata_store(&config).await.context("open metadata store")?;
    store.initialize().await.context("initialize metadata store")?;

    let metrics = Arc::new(MetadataMetrics::new().context("build metrics")?);
    let nodes = NodeClient::new();
    let leases = LeaseManager::new(store.clone(), config.lease_ttl(), config.lease_sweep_interval());
    let coordinator = UploadCoordinator::new(
        store.clone(),
        leases.clone(),
        nodes.clone(),
        metrics.clone(),
        config.clone(),
    );
    let reconciler = ReplicaReconciler::new(store.clone(), nodes.clone(), metrics.clone(), config.clone());

    let services = Arc::new(MetadataServices {
        store: store.clone(),
        coordinator,
        leases: leases.clone(),
        nodes,
        metrics,
        config: config.clone(),
    });

    let shutdown = ShutdownCoordinator::default();

    let reconciler_handle = {
        let token = shutdown.token();
        tokio::spawn(async move { reconciler.run(token).await })
    };
    let sweeper_handle = {
        let token = shutdown.token();
        tokio::spawn(async move { leases.run_sweeper(token).await })
    };

    let listener = tokio::net::TcpListener::bind(&config.metadata_listen)
        .await
        .with_context(|| format!("bind {}", config.metadata_listen))?;
    info!("Metadata service listening on {}", listener.local_addr()?);

    let server_token = shutdown.token();
    axum::serve(listener, metadata::router(services))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = wait_for_interrupt() => {}
                _ = server_token.cancelled() => {}
            }
        })
        .await
        .context("serve")?;

    // Listener is closed; drain the periodic tasks within the grace period.
    shutdown.initiate_shutdown();
    let waiter = shutdown.clone();
    tokio::spawn(async move {
        let _ = reconciler_handle.await;
        let _ = sweeper_handle.await;
        waiter.complete_shutdown();
    });
    shutdown.wait_for_shutdown().await;

    store.close().await.ok();
    info!("Metadata service stopped");
    Ok(())
}
