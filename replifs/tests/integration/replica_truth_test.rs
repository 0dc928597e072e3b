// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Heartbeat-as-truth: the inventory a node reports decides its replica
//! rows, and the reconciler's health view follows within one pass.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use replifs::application::replica_reconciler::plan_repairs;
use replifs::infrastructure::config::RebalanceStrategy;
use replifs::infrastructure::repositories::SqliteMetadataStore;
use replifs_domain::{
    ChunkCommit, ChunkEntry, ChunkId, FileMetadata, HeartbeatSample, MetadataStore, VirtualPath,
};

fn heartbeat(node_id: &str, chunk_ids: Vec<ChunkId>) -> HeartbeatSample {
    HeartbeatSample {
        node_id: node_id.to_string(),
        url: Some(format!("http://{}:8001", node_id)),
        free_space: 500,
        total_space: 1000,
        chunk_ids,
        overlay_address: None,
        overlay_peer_id: None,
    }
}

fn planned(path: &str, chunks: usize) -> FileMetadata {
    let entries = (0..chunks)
        .map(|i| ChunkEntry::planned(ChunkId::new(), i as u64, 10))
        .collect();
    FileMetadata::planned(
        VirtualPath::parse(path).unwrap(),
        10 * chunks as u64,
        entries,
        Utc::now(),
    )
}

/// Invariant 4: once a heartbeat omits a chunk, no replica row claims the
/// node holds it, and the reconciler sees the deficit in the same pass.
#[tokio::test]
async fn test_omitted_chunk_is_pruned_and_flagged_for_repair() {
    let store = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
    let timeout = Duration::seconds(60);
    let now = Utc::now();

    let file = planned("/victim", 2);
    let chunks = file.chunk_ids();
    store.insert_file(&file).await.unwrap();

    // Three nodes, all holding both chunks.
    for node in ["node-a", "node-b", "node-c"] {
        store
            .apply_heartbeat(&heartbeat(node, chunks.clone()), timeout, now)
            .await
            .unwrap();
    }
    store
        .commit_file(
            file.file_id,
            &chunks
                .iter()
                .map(|&chunk_id| ChunkCommit {
                    chunk_id,
                    checksum: "aa".repeat(32),
                    nodes: vec!["node-a".into(), "node-b".into(), "node-c".into()],
                })
                .collect::<Vec<_>>(),
            now,
        )
        .await
        .unwrap();

    // node-b loses the second chunk (disk scrub, manual removal, whatever):
    // its next heartbeat omits it.
    let report = store
        .apply_heartbeat(&heartbeat("node-b", vec![chunks[0]]), timeout, now)
        .await
        .unwrap();
    assert_eq!(report.replicas_removed, 1);

    let synced = store.get_file_by_id(file.file_id).await.unwrap().unwrap();
    let holders: HashSet<&str> = synced.chunks[1]
        .replicas
        .iter()
        .map(|r| r.node_id.as_str())
        .collect();
    assert!(!holders.contains("node-b"), "ghost replica survived heartbeat sync");
    assert_eq!(holders.len(), 2);

    // The reconciler planning pass flags exactly that chunk.
    let active = store.active_nodes(timeout, now).await.unwrap();
    let files = store.list_files(None, 100, 0).await.unwrap();
    let tasks = plan_repairs(&files, &active, 3, false, RebalanceStrategy::Hybrid);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].chunk_id, chunks[1]);
    assert_eq!(tasks[0].needed, 1);
}

/// A node going silent (no heartbeat at all) drops out of the active set
/// and its replicas stop counting as healthy, without being deleted.
#[tokio::test]
async fn test_silent_node_replicas_become_unhealthy_not_deleted() {
    let store = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
    let timeout = Duration::seconds(60);
    let start = Utc::now();

    let file = planned("/quiet", 1);
    let chunk_id = file.chunk_ids()[0];
    store.insert_file(&file).await.unwrap();

    store
        .apply_heartbeat(&heartbeat("node-a", vec![chunk_id]), timeout, start)
        .await
        .unwrap();
    store
        .apply_heartbeat(&heartbeat("node-b", vec![chunk_id]), timeout, start)
        .await
        .unwrap();

    // Two minutes later only node-a heartbeats; node-b goes stale.
    let later = start + Duration::seconds(120);
    store
        .apply_heartbeat(&heartbeat("node-a", vec![chunk_id]), timeout, later)
        .await
        .unwrap();

    let synced = store.get_file_by_id(file.file_id).await.unwrap().unwrap();
    // Both replica rows still exist: node-b never *denied* holding the
    // chunk, it just went quiet.
    assert_eq!(synced.chunks[0].replicas.len(), 2);

    // But health counts only node-a.
    let active = store.active_nodes(timeout, later).await.unwrap();
    let active_ids: HashSet<String> = active.iter().map(|n| n.node_id.clone()).collect();
    assert_eq!(synced.chunks[0].healthy_replicas(&active_ids).len(), 1);
}

/// A heartbeat from a node the metadata has never seen creates the row in
/// active state (boundary behavior from the protocol).
#[tokio::test]
async fn test_unknown_node_heartbeat_creates_active_row() {
    let store = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
    let report = store
        .apply_heartbeat(&heartbeat("stranger", vec![]), Duration::seconds(60), Utc::now())
        .await
        .unwrap();
    assert!(report.node_created);

    let node = store.get_node("stranger").await.unwrap().unwrap();
    assert_eq!(node.state, replifs_domain::NodeState::Active);
}

/// A node reporting chunks of a soft-deleted file gains no replica rows:
/// sync only walks live files.
#[tokio::test]
async fn test_sync_ignores_deleted_files() {
    let store = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
    let timeout = Duration::seconds(60);
    let now = Utc::now();

    let file = planned("/deleted", 1);
    let chunk_id = file.chunk_ids()[0];
    store.insert_file(&file).await.unwrap();
    store
        .delete_file(&VirtualPath::parse("/deleted").unwrap(), false, now)
        .await
        .unwrap();

    let report = store
        .apply_heartbeat(&heartbeat("node-a", vec![chunk_id]), timeout, now)
        .await
        .unwrap();
    assert_eq!(report.replicas_added, 0);
    assert_eq!(report.files_updated, 0);
}
