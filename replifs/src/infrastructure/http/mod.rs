// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Outbound HTTP clients with pooled connections and per-call deadlines.

pub mod metadata_client;
pub mod node_client;

pub use metadata_client::MetadataClient;
pub use node_client::{
    decode_tail, encode_tail, FetchedChunk, NodeClient, CHUNK_CHECKSUM_HEADER,
    CHUNK_ENCODING_HEADER, CHUNK_ID_HEADER,
};
