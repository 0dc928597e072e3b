// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Replifs
//!
//! A distributed file store built from two cooperating services: a single
//! **metadata service** coordinating a fleet of **storage nodes**. Clients
//! upload byte streams under virtual paths; the system splits each stream
//! into fixed-size chunks, replicates every chunk across nodes with
//! pipeline writes, and keeps the replication factor intact when nodes
//! disappear.
//!
//! ## The Coordination Core
//!
//! - **Upload protocol**: plan, pipeline write, commit; a write lease
//!   serializes writers per path from init to commit
//!   ([`application::UploadCoordinator`])
//! - **Heartbeat replica truth**: every heartbeat carries the node's
//!   exact on-disk inventory, and the metadata tracks it verbatim: replicas
//!   a heartbeat stops reporting are pruned, never trusted
//!   ([`replifs_domain::MetadataStore::apply_heartbeat`])
//! - **Re-replication**: a background reconciler intersects committed
//!   replicas with the active fleet and copies chunks back up to the
//!   factor, letting the next heartbeat record the new placement
//!   ([`application::ReplicaReconciler`])
//! - **Leases**: non-blocking per-path exclusion with TTL, renewal, and a
//!   sweeper ([`application::LeaseManager`])
//! - **Chunk store**: compressed, checksummed, atomically written blobs
//!   on each node ([`infrastructure::storage::ChunkStore`])
//!
//! ## Layering
//!
//! `replifs-domain` holds entities and the planner; this crate adds the
//! application services, infrastructure (SQLite/PostgreSQL metadata
//! backends, HTTP clients, chunk storage, Prometheus metrics), the axum
//! presentation of both services, and three binaries: `replifs-metadata`,
//! `replifs-node`, and the `replifs` client CLI.

pub mod application;
pub mod infrastructure;
pub mod presentation;
pub mod wire;
