// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interfaces
//!
//! Bootstrap-layer CLI definitions for the three replifs binaries:
//!
//! - `replifs-metadata`: the metadata service ([`MetadataArgs`])
//! - `replifs-node`: a storage node ([`NodeArgs`])
//! - `replifs`: the client front-end ([`ClientArgs`])
//!
//! Flags only *override* the environment-driven configuration; the
//! authoritative defaults live in the `DFS_*` environment schema so
//! container deployments need no flags at all. Parsing happens here in the
//! bootstrap layer; interpretation (merging into the config) happens in the
//! composition roots.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Arguments for the metadata service binary.
#[derive(Debug, Parser)]
#[command(name = "replifs-metadata", version, about = "replifs metadata service")]
pub struct MetadataArgs {
    /// Listen address, e.g. 0.0.0.0:8000
    #[arg(long)]
    pub listen: Option<String>,

    /// Metadata backend: sqlite or postgres
    #[arg(long)]
    pub backend: Option<String>,

    /// Database URL (sqlite path or postgres DSN)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Arguments for the storage node binary.
#[derive(Debug, Parser)]
#[command(name = "replifs-node", version, about = "replifs storage node")]
pub struct NodeArgs {
    /// Listen address, e.g. 0.0.0.0:8001
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory holding chunk files
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Stable node identity; defaults to the id persisted in the storage dir
    #[arg(long)]
    pub node_id: Option<String>,

    /// Base URL of the metadata service
    #[arg(long)]
    pub metadata_url: Option<String>,

    /// Public base URL other nodes and clients reach this node on
    #[arg(long)]
    pub public_url: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Arguments for the client CLI.
#[derive(Debug, Parser)]
#[command(name = "replifs", version, about = "replifs distributed file store client")]
pub struct ClientArgs {
    /// Base URL of the metadata service
    #[arg(long)]
    pub metadata_url: Option<String>,

    /// Route chunk traffic through the metadata service proxy endpoints
    /// (for clients without direct reachability to storage nodes)
    #[arg(long)]
    pub proxy: bool,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: ClientCommand,
}

/// Client subcommands.
#[derive(Debug, Subcommand)]
pub enum ClientCommand {
    /// Upload a local file to a virtual path
    Upload {
        /// Local file to read
        input: PathBuf,
        /// Virtual destination path, e.g. /data/backup.bin
        path: String,
        /// Override the chunk size in MiB
        #[arg(long)]
        chunk_size_mb: Option<u64>,
    },
    /// Download a virtual path to a local file
    Download {
        /// Virtual source path
        path: String,
        /// Local file to write
        output: PathBuf,
    },
    /// List files, optionally under a prefix
    Ls {
        prefix: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Delete a file (soft delete unless --permanent)
    Rm {
        path: String,
        #[arg(long)]
        permanent: bool,
    },
    /// Show file metadata including replica placement
    Stat { path: String },
    /// List storage nodes known to the metadata service
    Nodes,
    /// Show cluster statistics
    Stats,
}

/// Validates a `host:port` listen address.
pub fn validate_listen_addr(addr: &str) -> Result<(), String> {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
            Ok(p) if p != 0 => Ok(()),
            _ => Err(format!("invalid port in listen address '{}'", addr)),
        },
        _ => Err(format!("listen address '{}' must be host:port", addr)),
    }
}
