// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Cluster scenarios over real sockets. Heartbeats tick at 200ms and the
//! node timeout is 2s, so convergence assertions use generous polling
//! windows rather than fixed sleeps.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;

use replifs_domain::MetadataStore;

use crate::common::{calculate_sha256, wait_for, TestCluster};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// S1 "round trip": three nodes, one megabyte of 0x78, full factor.
#[tokio::test]
async fn test_s1_round_trip() {
    let cluster = TestCluster::start(3, 3).await;
    let client = cluster.client();
    let payload = vec![0x78u8; MIB as usize];

    let response = client
        .upload_bytes("/test/file1.bin", &payload, None)
        .await
        .unwrap();
    assert_eq!(response.status, "committed");
    assert_eq!(response.chunks, 1);
    assert_eq!(response.total_replicas, 3);
    assert!(response.under_replicated_chunks.is_empty());

    let file = client.stat("/test/file1.bin").await.unwrap();
    assert_eq!(file.size, MIB);
    assert_eq!(file.chunks.len(), 1);
    assert_eq!(file.chunks[0].committed_replicas().count(), 3);

    let downloaded = client.download_bytes("/test/file1.bin").await.unwrap();
    assert_eq!(downloaded, payload);
    assert_eq!(calculate_sha256(&downloaded), calculate_sha256(&payload));
}

/// S2 "node loss, repair": with the fleet at the factor there is no spare
/// target, so the chunk sits at two healthy replicas until a fourth node
/// joins; one reconcile pass plus a heartbeat then restores three.
#[tokio::test]
async fn test_s2_node_loss_and_repair() {
    let mut cluster = TestCluster::start(3, 3).await;
    let client = cluster.client();

    // Four chunks of 64 KiB (the last short), miniature version of the
    // 200 MiB / 64 MiB original.
    let payload: Vec<u8> = (0..200 * KIB).map(|i| (i % 251) as u8).collect();
    client
        .upload_bytes("/loss/data.bin", &payload, Some(64 * KIB))
        .await
        .unwrap();

    let file = client.stat("/loss/data.bin").await.unwrap();
    assert_eq!(file.chunks.len(), 4);

    cluster.kill_node(1);
    cluster.wait_active_nodes(2).await;

    // With only two nodes alive, repair has nowhere to copy: healthy stays
    // at 2 for every chunk.
    let stats = cluster.reconciler.run_once().await.unwrap();
    assert_eq!(stats.under_replicated, 4);
    assert_eq!(stats.copies_succeeded, 0);

    // A fourth node joins; the next pass copies every chunk there.
    cluster.add_node().await;
    cluster.wait_active_nodes(3).await;

    let stats = cluster.reconciler.run_once().await.unwrap();
    assert_eq!(stats.under_replicated, 4);
    assert_eq!(stats.copies_succeeded, 4);

    // The new node's heartbeat teaches the metadata the placement.
    let store = cluster.store.clone();
    let timeout = cluster.config.node_timeout();
    let file_id = file.file_id;
    wait_for(Duration::from_secs(10), || {
        let store = store.clone();
        async move {
            let Ok(Some(file)) = store.get_file_by_id(file_id).await else {
                return false;
            };
            let Ok(active) = store.active_nodes(timeout, Utc::now()).await else {
                return false;
            };
            let active_ids: HashSet<String> = active.into_iter().map(|n| n.node_id).collect();
            file.chunks
                .iter()
                .all(|c| c.healthy_replicas(&active_ids).len() == 3)
        }
    })
    .await
    .expect("every chunk should return to 3 healthy replicas");

    // And the data still reads back intact.
    let downloaded = client.download_bytes("/loss/data.bin").await.unwrap();
    assert_eq!(downloaded, payload);
}

/// S3 "concurrent writers": exactly one of two simultaneous upload-inits
/// wins; the loser can take the path once it is deleted.
#[tokio::test]
async fn test_s3_concurrent_writers() {
    let cluster = TestCluster::start(3, 3).await;
    let client_a = cluster.client();
    let client_b = cluster.client();
    let payload = b"contended content".to_vec();

    let (a, b) = tokio::join!(
        client_a.upload_bytes("/x", &payload, None),
        client_b.upload_bytes("/x", &payload, None),
    );
    let (winner, loser) = match (&a, &b) {
        (Ok(_), Err(_)) => (a.unwrap(), b.unwrap_err()),
        (Err(_), Ok(_)) => (b.unwrap(), a.unwrap_err()),
        other => panic!("exactly one writer should win, got {:?}", other),
    };
    assert_eq!(winner.status, "committed");
    assert!(matches!(loser, replifs_domain::DfsError::Conflict(_)));

    // Retry against the committed path still conflicts...
    let err = client_b.upload_bytes("/x", &payload, None).await.unwrap_err();
    assert!(matches!(err, replifs_domain::DfsError::Conflict(_)));

    // ...until the path is deleted.
    client_a.delete("/x", false).await.unwrap();
    client_b.upload_bytes("/x", &payload, None).await.unwrap();
}

/// S4 "corruption": a mangled chunk answers 500 with a checksum message on
/// its node, while the file stays readable through another replica.
#[tokio::test]
async fn test_s4_corruption_detected_and_survived() {
    let cluster = TestCluster::start(3, 3).await;
    let client = cluster.client();
    let payload: Vec<u8> = (0..64 * KIB).map(|i| (i * 7 % 256) as u8).collect();

    client.upload_bytes("/y", &payload, None).await.unwrap();
    let file = client.stat("/y").await.unwrap();
    let chunk_id = file.chunks[0].chunk_id;

    // Mangle the chunk payload on the first node, behind the store's back.
    let victim = &cluster.nodes[0];
    let chunk_path = victim.chunk_store.root().join(format!("{}.chunk", chunk_id));
    std::fs::write(&chunk_path, b"not the chunk you wrote").unwrap();

    // Direct GET from the victim: 500 with a checksum complaint.
    let url = format!("{}/api/v1/chunks/{}", victim.url, chunk_id);
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.text().await.unwrap();
    assert!(body.contains("checksum"), "error body should mention checksum: {}", body);

    // The client falls through to a healthy replica.
    let downloaded = client.download_bytes("/y").await.unwrap();
    assert_eq!(downloaded, payload);
}

/// S5 "large file pipeline": one PUT per chunk fans out to every node;
/// each node's inventory holds the full chunk set at commit time.
#[tokio::test]
async fn test_s5_pipeline_populates_every_node() {
    let cluster = TestCluster::start(3, 3).await;
    let client = cluster.client();
    let payload: Vec<u8> = (0..10 * MIB).map(|i| (i % 256) as u8).collect();

    let response = client
        .upload_bytes("/pipeline/big.bin", &payload, Some(MIB))
        .await
        .unwrap();
    assert_eq!(response.chunks, 10);
    assert_eq!(response.total_replicas, 30);

    let file = client.stat("/pipeline/big.bin").await.unwrap();
    let expected: HashSet<_> = file.chunks.iter().map(|c| c.chunk_id).collect();

    for node in &cluster.nodes {
        let inventory: HashSet<_> = node.chunk_store.inventory().await.unwrap().into_iter().collect();
        assert!(
            expected.is_subset(&inventory),
            "node {} is missing chunks",
            node.node_id
        );
    }

    let downloaded = client.download_bytes("/pipeline/big.bin").await.unwrap();
    assert_eq!(downloaded, payload);
}

/// S6 "soft delete then list": a soft-deleted path disappears from
/// listings and frees the name; permanent deletion clears metadata and
/// storage.
#[tokio::test]
async fn test_s6_delete_lifecycle() {
    let cluster = TestCluster::start(3, 3).await;
    let client = cluster.client();
    let payload = b"short-lived".to_vec();

    client.upload_bytes("/z", &payload, None).await.unwrap();
    assert_eq!(client.list(Some("/z"), 100, 0).await.unwrap().len(), 1);

    let response = client.delete("/z", false).await.unwrap();
    assert!(!response.permanent);
    assert!(client.list(Some("/z"), 100, 0).await.unwrap().is_empty());
    assert!(matches!(
        client.stat("/z").await.unwrap_err(),
        replifs_domain::DfsError::NotFound(_)
    ));

    // Permanent removal drops the row and clears the chunks off the nodes.
    client.delete("/z", true).await.unwrap();
    wait_for(Duration::from_secs(5), || async {
        for node in &cluster.nodes {
            match node.chunk_store.inventory().await {
                Ok(inventory) if inventory.is_empty() => continue,
                _ => return false,
            }
        }
        true
    })
    .await
    .expect("chunks should be removed from storage nodes");
}

/// Zero-byte uploads plan zero chunks and read back empty.
#[tokio::test]
async fn test_zero_byte_round_trip() {
    let cluster = TestCluster::start(3, 3).await;
    let client = cluster.client();

    let response = client.upload_bytes("/empty.bin", &[], None).await.unwrap();
    assert_eq!(response.chunks, 0);

    let downloaded = client.download_bytes("/empty.bin").await.unwrap();
    assert!(downloaded.is_empty());
}

/// Proxy mode: chunk traffic through the metadata service reaches the
/// nodes with the same pipeline semantics.
#[tokio::test]
async fn test_proxy_upload_and_download() {
    let cluster = TestCluster::start(3, 3).await;
    let proxied = cluster.client().with_proxy(true);
    let payload: Vec<u8> = (0..100 * KIB).map(|i| (i % 255) as u8).collect();

    let response = proxied
        .upload_bytes("/proxied.bin", &payload, Some(32 * KIB))
        .await
        .unwrap();
    assert_eq!(response.chunks, 4);
    assert_eq!(response.total_replicas, 12);

    let downloaded = proxied.download_bytes("/proxied.bin").await.unwrap();
    assert_eq!(downloaded, payload);
}

/// The metrics endpoints of both services expose Prometheus text.
#[tokio::test]
async fn test_metrics_endpoints_render() {
    let cluster = TestCluster::start(1, 1).await;
    let client = cluster.client();
    client.upload_bytes("/metric-fodder", b"x", None).await.unwrap();

    let body = reqwest::get(format!("{}/metrics", cluster.metadata_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("replifs_metadata_heartbeats_total"));

    let body = reqwest::get(format!("{}/metrics", cluster.nodes[0].url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("replifs_node_chunks_stored_total"));
}
