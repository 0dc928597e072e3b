// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Upload protocol over a real SQLite store: planning boundaries, commit
//! invariants, and lease interplay; everything short of moving bytes.

use std::sync::Arc;

use chrono::{Duration, Utc};

use replifs::application::{LeaseManager, UploadCoordinator};
use replifs::infrastructure::config::DfsConfig;
use replifs::infrastructure::http::NodeClient;
use replifs::infrastructure::metrics::MetadataMetrics;
use replifs::infrastructure::repositories::SqliteMetadataStore;
use replifs_domain::{
    ChunkCommit, DfsError, HeartbeatSample, MetadataStore, VirtualPath,
};

const CHUNK: u64 = 64 * 1024 * 1024;

async fn setup(nodes: usize) -> (Arc<SqliteMetadataStore>, UploadCoordinator) {
    let store = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
    let now = Utc::now();
    for i in 0..nodes {
        let hb = HeartbeatSample {
            node_id: format!("node-{}", i),
            url: Some(format!("http://node-{}:8001", i)),
            free_space: 10_000 - i as u64,
            total_space: 100_000,
            chunk_ids: vec![],
            overlay_address: None,
            overlay_peer_id: None,
        };
        store.apply_heartbeat(&hb, Duration::seconds(60), now).await.unwrap();
    }

    let config = Arc::new(DfsConfig::default());
    let leases = LeaseManager::new(store.clone(), config.lease_ttl(), config.lease_sweep_interval());
    let coordinator = UploadCoordinator::new(
        store.clone(),
        leases,
        NodeClient::new(),
        Arc::new(MetadataMetrics::new().unwrap()),
        config,
    );
    (store, coordinator)
}

fn full_commits(plans: &[replifs_domain::services::placement_planner::ChunkPlan]) -> Vec<ChunkCommit> {
    plans
        .iter()
        .map(|p| ChunkCommit {
            chunk_id: p.chunk_id,
            checksum: "ef".repeat(32),
            nodes: p.targets.iter().map(|t| t.node_id.clone()).collect(),
        })
        .collect()
}

#[tokio::test]
async fn test_exact_chunk_size_yields_single_chunk() {
    let (store, coordinator) = setup(3).await;

    let (file_id, plans) = coordinator.upload_init("/exact", CHUNK, None).await.unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].size, CHUNK);

    coordinator.commit(file_id, &full_commits(&plans)).await.unwrap();
    let file = store.get_file_by_id(file_id).await.unwrap().unwrap();
    file.validate().unwrap();
}

#[tokio::test]
async fn test_one_byte_over_chunk_size_yields_tail_chunk() {
    let (store, coordinator) = setup(3).await;

    let (file_id, plans) = coordinator.upload_init("/over", CHUNK + 1, None).await.unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].size, CHUNK);
    assert_eq!(plans[1].size, 1);

    coordinator.commit(file_id, &full_commits(&plans)).await.unwrap();
    let file = store.get_file_by_id(file_id).await.unwrap().unwrap();
    file.validate().unwrap();

    // Invariant 1: sizes sum to file size, seq_index contiguous.
    let total: u64 = file.chunks.iter().map(|c| c.size).sum();
    assert_eq!(total, CHUNK + 1);
    for (i, chunk) in file.chunks.iter().enumerate() {
        assert_eq!(chunk.seq_index, i as u64);
    }
}

#[tokio::test]
async fn test_zero_byte_upload_has_no_chunks() {
    let (store, coordinator) = setup(3).await;

    let (file_id, plans) = coordinator.upload_init("/zero", 0, None).await.unwrap();
    assert!(plans.is_empty());
    coordinator.commit(file_id, &[]).await.unwrap();

    let file = store.get_file_by_id(file_id).await.unwrap().unwrap();
    assert_eq!(file.size, 0);
    file.validate().unwrap();
}

#[tokio::test]
async fn test_upload_init_with_too_few_nodes_is_503_kind() {
    let (_store, coordinator) = setup(2).await;
    let err = coordinator.upload_init("/nope", 1024, None).await.unwrap_err();
    assert!(matches!(err, DfsError::InsufficientNodes(_)));
}

#[tokio::test]
async fn test_lease_exclusion_window_spans_init_to_commit() {
    let (_store, coordinator) = setup(3).await;

    let (file_id, plans) = coordinator.upload_init("/locked", 1024, None).await.unwrap();

    // Second writer bounces while the first upload is in flight.
    let err = coordinator.upload_init("/locked", 2048, None).await.unwrap_err();
    assert!(matches!(err, DfsError::Conflict(_)));

    coordinator.commit(file_id, &full_commits(&plans)).await.unwrap();

    // After commit the lease is gone; only the path itself conflicts now.
    let err = coordinator.upload_init("/locked", 2048, None).await.unwrap_err();
    assert!(matches!(err, DfsError::Conflict(_)));
    coordinator.delete("/locked", false).await.unwrap();
    coordinator.upload_init("/locked", 2048, None).await.unwrap();
}

#[tokio::test]
async fn test_commit_checksums_survive_round_trip() {
    let (store, coordinator) = setup(3).await;

    let (file_id, plans) = coordinator
        .upload_init("/checksums", 3 * CHUNK, None)
        .await
        .unwrap();
    let commits = full_commits(&plans);
    coordinator.commit(file_id, &commits).await.unwrap();

    let file = store
        .get_file_by_path(&VirtualPath::parse("/checksums").unwrap())
        .await
        .unwrap()
        .unwrap();
    for (chunk, commit) in file.chunks.iter().zip(&commits) {
        assert_eq!(chunk.checksum.as_deref(), Some(commit.checksum.as_str()));
        assert_eq!(chunk.replicas.len(), commit.nodes.len());
    }
}

#[tokio::test]
async fn test_planner_distributes_across_all_nodes() {
    let (_store, coordinator) = setup(5).await;

    // 8 chunks across 5 nodes at factor 3: every node should appear.
    let (_file_id, plans) = coordinator
        .upload_init("/spread", 8 * CHUNK, None)
        .await
        .unwrap();
    let mut seen: Vec<String> = plans
        .iter()
        .flat_map(|p| p.targets.iter().map(|t| t.node_id.clone()))
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5);
}
