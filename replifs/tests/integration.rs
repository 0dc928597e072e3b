// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Integration Tests
//!
//! Cross-component flows without sockets: coordinator + planner + store,
//! and the heartbeat-truth pipeline feeding the reconciler.

#[path = "integration/upload_protocol_test.rs"]
mod upload_protocol_test;

#[path = "integration/replica_truth_test.rs"]
mod replica_truth_test;
