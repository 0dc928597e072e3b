// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Per-node durable chunk persistence.

pub mod chunk_store;

pub use chunk_store::{ChunkStore, StorageInfo, StoredChunk};
