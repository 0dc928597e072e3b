// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Balance Criteria
//!
//! Pure predicates deciding whether a fully replicated chunk is *badly
//! placed*. Only consulted when rebalancing is enabled; a violation
//! enqueues a priority-2 task (capped per reconciler cycle), never blocking
//! the priority-1 under-replication repairs.
//!
//! Inputs are the chunk's current holders and a snapshot of the active
//! fleet; chunk counts and capacity ratios come from the node rows, which
//! heartbeats keep current.

use std::collections::HashSet;

use replifs_domain::NodeInfo;

use crate::infrastructure::config::RebalanceStrategy;

/// Normalized chunk-count variance beyond which the fleet counts as skewed.
const VARIANCE_THRESHOLD: f64 = 0.15;

/// Count margin: a candidate must be at least this much emptier than every
/// holder for a variance move to be worth the copy.
const VARIANCE_COUNT_MARGIN: u64 = 2;

/// Combined-load gap that justifies a move.
const LOAD_GAP_THRESHOLD: f64 = 0.5;

/// Evaluates the configured criterion for one chunk.
pub fn violates_balance(
    strategy: RebalanceStrategy,
    holders: &HashSet<String>,
    active: &[NodeInfo],
) -> bool {
    match strategy {
        RebalanceStrategy::Variance => variance_violation(holders, active),
        RebalanceStrategy::Load => load_violation(holders, active),
        RebalanceStrategy::Rack => rack_violation(holders, active),
        RebalanceStrategy::Hybrid => {
            let score = 2 * variance_violation(holders, active) as u32
                + 3 * load_violation(holders, active) as u32
                + 4 * rack_violation(holders, active) as u32;
            score >= 3
        }
    }
}

/// Chunk-count variance across the fleet is high AND some non-holder is
/// strictly emptier than every holder by more than the margin.
fn variance_violation(holders: &HashSet<String>, active: &[NodeInfo]) -> bool {
    if active.len() < 2 {
        return false;
    }
    let counts: Vec<f64> = active.iter().map(|n| n.chunk_count as f64).collect();
    let mean = counts.iter().sum::<f64>() / counts.len() as f64;
    if mean <= 0.0 {
        return false;
    }
    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
    if variance / (mean * mean) <= VARIANCE_THRESHOLD {
        return false;
    }

    let min_holder = active
        .iter()
        .filter(|n| holders.contains(&n.node_id))
        .map(|n| n.chunk_count)
        .min();
    let Some(min_holder) = min_holder else { return false };

    active
        .iter()
        .filter(|n| !holders.contains(&n.node_id))
        .any(|n| n.chunk_count + VARIANCE_COUNT_MARGIN < min_holder)
}

/// Combined score (chunks/100 + usage ratio): the busiest holder is far
/// above the idlest non-holder.
fn load_violation(holders: &HashSet<String>, active: &[NodeInfo]) -> bool {
    let score = |n: &NodeInfo| n.chunk_count as f64 / 100.0 + n.usage_ratio();

    let max_holder = active
        .iter()
        .filter(|n| holders.contains(&n.node_id))
        .map(|n| score(n))
        .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |a| a.max(s))));
    let min_nonholder = active
        .iter()
        .filter(|n| !holders.contains(&n.node_id))
        .map(|n| score(n))
        .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |a| a.min(s))));

    match (max_holder, min_nonholder) {
        (Some(h), Some(n)) => h - n > LOAD_GAP_THRESHOLD,
        _ => false,
    }
}

/// Some rack with active capacity holds no replica while another rack
/// stacks more than one.
fn rack_violation(holders: &HashSet<String>, active: &[NodeInfo]) -> bool {
    let mut replicas_per_rack: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
    let mut racks_seen: HashSet<&str> = HashSet::new();

    for node in active {
        let Some(rack) = node.rack.as_deref() else { continue };
        racks_seen.insert(rack);
        if holders.contains(&node.node_id) {
            *replicas_per_rack.entry(rack).or_insert(0) += 1;
        }
    }

    let empty_rack_exists = racks_seen
        .iter()
        .any(|rack| !replicas_per_rack.contains_key(rack));
    let stacked_rack_exists = replicas_per_rack.values().any(|&count| count > 1);

    empty_rack_exists && stacked_rack_exists
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use replifs_domain::NodeState;

    fn node(id: &str, chunk_count: u64, free: u64, total: u64, rack: Option<&str>) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            host: id.to_string(),
            port: 8001,
            rack: rack.map(str::to_string),
            free_space: free,
            total_space: total,
            chunk_count,
            last_heartbeat: Utc::now(),
            state: NodeState::Active,
            overlay_address: None,
            overlay_peer_id: None,
        }
    }

    fn holders(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_variance_needs_skew_and_empty_candidate() {
        // Heavy skew: holders carry 20 chunks, candidate has none.
        let active = vec![
            node("a", 20, 100, 1000, None),
            node("b", 20, 100, 1000, None),
            node("c", 0, 1000, 1000, None),
        ];
        assert!(variance_violation(&holders(&["a", "b"]), &active));

        // Uniform fleet: no violation even with a non-holder present.
        let uniform = vec![
            node("a", 10, 100, 1000, None),
            node("b", 10, 100, 1000, None),
            node("c", 10, 1000, 1000, None),
        ];
        assert!(!variance_violation(&holders(&["a", "b"]), &uniform));
    }

    #[test]
    fn test_variance_margin_blocks_marginal_moves() {
        // Candidate is only one chunk emptier than the emptiest holder.
        let active = vec![
            node("a", 4, 100, 1000, None),
            node("b", 20, 100, 1000, None),
            node("c", 3, 1000, 1000, None),
        ];
        assert!(!variance_violation(&holders(&["a", "b"]), &active));
    }

    #[test]
    fn test_load_gap() {
        // Holder at 0.9 usage + 60 chunks; candidate idle.
        let active = vec![
            node("busy", 60, 100, 1000, None),
            node("idle", 0, 1000, 1000, None),
        ];
        assert!(load_violation(&holders(&["busy"]), &active));

        // Comparable load on both sides.
        let balanced = vec![
            node("x", 10, 500, 1000, None),
            node("y", 10, 500, 1000, None),
        ];
        assert!(!load_violation(&holders(&["x"]), &balanced));
    }

    #[test]
    fn test_load_without_candidates_is_fine() {
        let active = vec![node("only", 60, 100, 1000, None)];
        assert!(!load_violation(&holders(&["only"]), &active));
    }

    #[test]
    fn test_rack_empty_plus_stacked() {
        let active = vec![
            node("a1", 5, 100, 1000, Some("r1")),
            node("a2", 5, 100, 1000, Some("r1")),
            node("b1", 5, 100, 1000, Some("r2")),
        ];
        // Both replicas stacked in r1, r2 empty.
        assert!(rack_violation(&holders(&["a1", "a2"]), &active));
        // Spread across racks: fine.
        assert!(!rack_violation(&holders(&["a1", "b1"]), &active));
    }

    #[test]
    fn test_rack_without_labels_never_fires() {
        let active = vec![
            node("a", 5, 100, 1000, None),
            node("b", 5, 100, 1000, None),
        ];
        assert!(!rack_violation(&holders(&["a"]), &active));
    }

    #[test]
    fn test_hybrid_weighting() {
        // Rack violation alone scores 4 >= 3.
        let rack_only = vec![
            node("a1", 5, 500, 1000, Some("r1")),
            node("a2", 5, 500, 1000, Some("r1")),
            node("b1", 5, 500, 1000, Some("r2")),
        ];
        assert!(violates_balance(
            RebalanceStrategy::Hybrid,
            &holders(&["a1", "a2"]),
            &rack_only
        ));

        // Variance violation alone scores 2 < 3.
        let variance_only = vec![
            node("a", 20, 500, 1000, None),
            node("b", 20, 500, 1000, None),
            node("c", 0, 500, 1000, None),
        ];
        assert!(variance_violation(&holders(&["a", "b"]), &variance_only));
        assert!(!load_violation(&holders(&["a", "b"]), &variance_only));
        assert!(!violates_balance(
            RebalanceStrategy::Hybrid,
            &holders(&["a", "b"]),
            &variance_only
        ));
    }
}
