// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects: immutable, self-validating types compared by value.

pub mod chunk_id;
pub mod chunk_size;
pub mod file_id;
pub mod lease_id;
pub mod virtual_path;

pub use chunk_id::ChunkId;
pub use chunk_size::ChunkSize;
pub use file_id::FileId;
pub use lease_id::LeaseId;
pub use virtual_path::VirtualPath;
