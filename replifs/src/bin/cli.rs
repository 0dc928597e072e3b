// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Client CLI
//!
//! Thin front-end over the client library: upload, download, ls, rm, stat,
//! nodes, stats. Chunk traffic goes directly to storage nodes unless
//! `--proxy` routes it through the metadata service.

use anyhow::Context;
use clap::Parser;

use replifs::application::DfsClient;
use replifs_bootstrap::{init_tracing, ClientArgs, ClientCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();
    init_tracing("replifs", args.verbose);

    let metadata_url = args
        .metadata_url
        .or_else(|| std::env::var("DFS_METADATA_URL").ok())
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    let client = DfsClient::new(metadata_url).with_proxy(args.proxy);

    match args.command {
        ClientCommand::Upload {
            input,
            path,
            chunk_size_mb,
        } => {
            let chunk_size = chunk_size_mb.map(|mb| mb * 1024 * 1024);
            let response = client
                .upload_file(&input, &path, chunk_size)
                .await
                .with_context(|| format!("upload {:?}", input))?;
            println!(
                "Uploaded {} ({} chunks, {} replicas)",
                path, response.chunks, response.total_replicas
            );
            if !response.under_replicated_chunks.is_empty() {
                println!(
                    "Warning: {} chunk(s) under-replicated; the reconciler will restore the factor",
                    response.under_replicated_chunks.len()
                );
            }
        }
        ClientCommand::Download { path, output } => {
            let size = client
                .download_file(&path, &output)
                .await
                .with_context(|| format!("download {}", path))?;
            println!("Downloaded {} -> {:?} ({} bytes)", path, output, size);
        }
        ClientCommand::Ls {
            prefix,
            limit,
            offset,
        } => {
            let files = client.list(prefix.as_deref(), limit, offset).await?;
            if files.is_empty() {
                println!("(no files)");
            }
            for file in files {
                println!("{:>12}  {}  {}", file.size, file.modified_at.format("%Y-%m-%d %H:%M:%S"), file.path);
            }
        }
        ClientCommand::Rm { path, permanent } => {
            let response = client.delete(&path, permanent).await?;
            println!(
                "{} {}",
                if response.permanent { "Deleted" } else { "Soft-deleted" },
                response.path
            );
        }
        ClientCommand::Stat { path } => {
            let file = client.stat(&path).await?;
            println!("path:     {}", file.path);
            println!("file_id:  {}", file.file_id);
            println!("size:     {} bytes", file.size);
            println!("created:  {}", file.created_at.to_rfc3339());
            println!("modified: {}", file.modified_at.to_rfc3339());
            println!("chunks:   {}", file.chunks.len());
            for chunk in &file.chunks {
                let replicas: Vec<&str> = chunk.replicas.iter().map(|r| r.node_id.as_str()).collect();
                println!(
                    "  [{}] {} ({} bytes) -> {}",
                    chunk.seq_index,
                    chunk.chunk_id,
                    chunk.size,
                    if replicas.is_empty() { "no replicas".to_string() } else { replicas.join(", ") }
                );
            }
        }
        ClientCommand::Nodes => {
            let nodes = client.nodes().await?;
            for node in nodes {
                println!(
                    "{}  {}  {:?}  {} chunks  {}/{} bytes free",
                    node.node_id,
                    node.url(),
                    node.state,
                    node.chunk_count,
                    node.free_space,
                    node.total_space
                );
            }
        }
        ClientCommand::Stats => {
            let response = client.stats().await?;
            let s = response.stats;
            println!("files:         {}", s.total_files);
            println!("chunks:        {}", s.total_chunks);
            println!("nodes:         {} ({} active)", s.total_nodes, s.active_nodes);
            println!("logical bytes: {}", s.total_size);
            println!("capacity:      {} ({} used, {} free)", s.total_space, s.used_space, s.free_space);
            println!("replication:   {}", response.replication_factor);
        }
    }

    Ok(())
}
