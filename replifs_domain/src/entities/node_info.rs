// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Node Entity
//!
//! One registered storage node as the metadata service sees it: network
//! identity, capacity, liveness, and optional overlay addressing. A node row
//! is created on first heartbeat or explicit registration and is never
//! deleted automatically; staleness only transitions it to `inactive`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::ChunkId;

/// Liveness/lifecycle state of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Heartbeating within the timeout window.
    Active,
    /// Heartbeat older than the node timeout.
    Inactive,
    /// Operator-initiated drain; accepts reads, excluded from placement.
    Draining,
    /// Operator-marked failure.
    Failed,
}

/// One storage node row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Opaque id, stable across restarts of the node process.
    pub node_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
    pub free_space: u64,
    pub total_space: u64,
    #[serde(default)]
    pub chunk_count: u64,
    pub last_heartbeat: DateTime<Utc>,
    pub state: NodeState,
    /// Address inside a mesh overlay, preferred over `host` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_address: Option<String>,
    /// Peer id inside the overlay (deployment metadata only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_peer_id: Option<String>,
}

impl NodeInfo {
    /// Base URL for talking to this node, preferring the overlay address.
    pub fn url(&self) -> String {
        let host = self.overlay_address.as_deref().unwrap_or(&self.host);
        format!("http://{}:{}", host, self.port)
    }

    /// True when the node is `active` and its heartbeat is newer than the
    /// timeout as of `now`.
    pub fn is_active(&self, node_timeout: Duration, now: DateTime<Utc>) -> bool {
        self.state == NodeState::Active && now - self.last_heartbeat <= node_timeout
    }

    /// Fraction of the node's capacity in use, in `[0, 1]`.
    pub fn usage_ratio(&self) -> f64 {
        if self.total_space == 0 {
            return 0.0;
        }
        1.0 - (self.free_space as f64 / self.total_space as f64)
    }
}

/// One heartbeat as received from a storage node.
///
/// `chunk_ids` is the node's on-disk inventory computed immediately before
/// sending and is the single source of truth about what the node holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatSample {
    pub node_id: String,
    /// Public base URL the node serves chunks on (`http://host:port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub free_space: u64,
    pub total_space: u64,
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_peer_id: Option<String>,
}

impl HeartbeatSample {
    /// Host and port parsed out of the reported URL, if any.
    pub fn host_port(&self) -> Option<(String, u16)> {
        let url = self.url.as_deref()?;
        let rest = url.strip_prefix("http://").or_else(|| url.strip_prefix("https://"))?;
        let rest = rest.split('/').next()?;
        let (host, port) = rest.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some((host.to_string(), port))
    }
}

/// Bootstrap registration payload, sent once before the first heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
    #[serde(default)]
    pub total_space: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_peer_id: Option<String>,
    /// Shared secret; checked against the service's configured token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(last_heartbeat: DateTime<Utc>, state: NodeState) -> NodeInfo {
        NodeInfo {
            node_id: "node-a".into(),
            host: "10.0.0.1".into(),
            port: 8001,
            rack: None,
            free_space: 50,
            total_space: 100,
            chunk_count: 0,
            last_heartbeat,
            state,
            overlay_address: None,
            overlay_peer_id: None,
        }
    }

    #[test]
    fn test_is_active_respects_timeout() {
        let now = Utc::now();
        let fresh = node(now - Duration::seconds(10), NodeState::Active);
        let stale = node(now - Duration::seconds(120), NodeState::Active);
        let timeout = Duration::seconds(60);

        assert!(fresh.is_active(timeout, now));
        assert!(!stale.is_active(timeout, now));
    }

    #[test]
    fn test_non_active_states_never_count() {
        let now = Utc::now();
        let draining = node(now, NodeState::Draining);
        assert!(!draining.is_active(Duration::seconds(60), now));
    }

    #[test]
    fn test_url_prefers_overlay_address() {
        let mut n = node(Utc::now(), NodeState::Active);
        assert_eq!(n.url(), "http://10.0.0.1:8001");
        n.overlay_address = Some("100.64.0.7".into());
        assert_eq!(n.url(), "http://100.64.0.7:8001");
    }

    #[test]
    fn test_usage_ratio() {
        let n = node(Utc::now(), NodeState::Active);
        assert!((n.usage_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_heartbeat_host_port_parsing() {
        let hb = HeartbeatSample {
            node_id: "n".into(),
            url: Some("http://10.1.2.3:8001".into()),
            free_space: 0,
            total_space: 0,
            chunk_ids: vec![],
            overlay_address: None,
            overlay_peer_id: None,
        };
        assert_eq!(hb.host_port(), Some(("10.1.2.3".to_string(), 8001)));

        let bad = HeartbeatSample { url: Some("10.1.2.3".into()), ..hb.clone() };
        assert_eq!(bad.host_port(), None);

        let none = HeartbeatSample { url: None, ..hb };
        assert_eq!(none.host_port(), None);
    }
}
