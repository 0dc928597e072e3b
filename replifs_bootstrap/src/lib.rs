// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Module
//!
//! The bootstrap layer sits **outside** the enterprise layers (domain,
//! application, infrastructure) and owns process concerns shared by the
//! replifs binaries:
//!
//! - **Argument parsing**: per-binary clap definitions ([`cli`])
//! - **Logging**: tracing subscriber setup ([`logger`])
//! - **Shutdown**: cancellation tokens, grace period, signal handling
//!   ([`shutdown`])
//!
//! ## Architecture Position
//!
//! Bootstrap can reach every layer; no enterprise layer may depend on
//! bootstrap. Composition roots (the `src/bin/*.rs` files of the service
//! crate) use this module to parse arguments, initialize logging, build the
//! service graph, and coordinate shutdown:
//!
//! 1. stop accepting new HTTP requests,
//! 2. cancel periodic tasks and wait out the grace period (≤5s),
//! 3. close the metadata or chunk store.

pub mod cli;
pub mod logger;
pub mod shutdown;

pub use cli::{ClientArgs, ClientCommand, MetadataArgs, NodeArgs};
pub use logger::init_tracing;
pub use shutdown::{wait_for_interrupt, CancellationToken, ShutdownCoordinator};
