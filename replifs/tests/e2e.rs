// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-End Tests
//!
//! Full-cluster scenarios over real sockets: upload/download round trips,
//! node loss and repair, concurrent writers, corruption handling, and the
//! delete lifecycle.

// Shared test helpers
mod common;

#[path = "e2e/cluster_scenarios_test.rs"]
mod cluster_scenarios_test;
