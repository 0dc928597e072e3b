// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Application layer: the coordination services of the file store. Each
//! service owns one protocol responsibility and composes domain logic with
//! infrastructure ports; none of them touch SQL or sockets directly.

pub mod dfs_client;
pub mod heartbeat_reporter;
pub mod lease_manager;
pub mod rebalance;
pub mod replica_reconciler;
pub mod upload_coordinator;

pub use dfs_client::DfsClient;
pub use heartbeat_reporter::HeartbeatReporter;
pub use lease_manager::{LeaseGuard, LeaseManager};
pub use replica_reconciler::{ReconcileStats, RepairTask, ReplicaReconciler};
pub use upload_coordinator::{CommitOutcome, UploadCoordinator};
