// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Node Client
//!
//! Outbound HTTP to storage node chunk endpoints, shared by pipeline
//! forwarding, the repair path of the reconciler, the metadata proxy, and
//! the client library. One `reqwest::Client` per process gives keep-alive
//! connection pooling; every call carries an explicit deadline.
//!
//! ## Pipeline Tail Encoding
//!
//! The `replicate_to` query parameter carries the remaining pipeline as
//! pipe-separated `host:port` entries. Forwarded payloads are the node's
//! already-compressed bytes, marked with the `X-Chunk-Encoding: gzip`
//! header so the receiver decodes before checksumming instead of guessing.

use std::time::Duration;

use reqwest::multipart;
use tracing::debug;

use replifs_domain::{ChunkId, DfsError};

use crate::wire::StoreChunkReply;

/// Header marking a chunk payload as gzip-compressed in flight.
pub const CHUNK_ENCODING_HEADER: &str = "X-Chunk-Encoding";

/// Header carrying the verified checksum on chunk downloads.
pub const CHUNK_CHECKSUM_HEADER: &str = "X-Checksum";

/// Header carrying the chunk id on chunk downloads.
pub const CHUNK_ID_HEADER: &str = "X-Chunk-ID";

/// A chunk fetched from a node: uncompressed bytes plus the checksum the
/// node verified while reading.
#[derive(Debug, Clone)]
pub struct FetchedChunk {
    pub data: Vec<u8>,
    pub checksum: Option<String>,
}

/// Connection-pooled client for storage node endpoints.
#[derive(Clone)]
pub struct NodeClient {
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Wraps an existing pooled client (shared across services in one
    /// process).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Uploads a chunk to a node's Store endpoint.
    ///
    /// `tail` is the remaining pipeline (`host:port` entries) the receiving
    /// node forwards to; empty for repair pushes. `gzip` marks `payload` as
    /// already compressed.
    pub async fn store_chunk(
        &self,
        base_url: &str,
        chunk_id: ChunkId,
        payload: Vec<u8>,
        gzip: bool,
        tail: &[String],
        timeout: Duration,
    ) -> Result<StoreChunkReply, DfsError> {
        let mut url = format!("{}/api/v1/chunks/{}", base_url.trim_end_matches('/'), chunk_id);
        if !tail.is_empty() {
            url.push_str(&format!("?replicate_to={}", encode_tail(tail)));
        }

        let part = multipart::Part::bytes(payload)
            .file_name("chunk")
            .mime_str("application/octet-stream")
            .map_err(|e| DfsError::Internal(format!("multipart: {}", e)))?;
        let form = multipart::Form::new().part("file", part);

        let mut request = self.http.put(&url).multipart(form).timeout(timeout);
        if gzip {
            request = request.header(CHUNK_ENCODING_HEADER, "gzip");
        }

        debug!("PUT {} (tail: {})", url, tail.len());
        let response = request
            .send()
            .await
            .map_err(|e| unreachable_error(base_url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(base_url, status, &body));
        }

        response
            .json::<StoreChunkReply>()
            .await
            .map_err(|e| DfsError::SerializationFailure(format!("store reply from {}: {}", base_url, e)))
    }

    /// Downloads the uncompressed bytes of a chunk.
    pub async fn fetch_chunk(
        &self,
        base_url: &str,
        chunk_id: ChunkId,
        timeout: Duration,
    ) -> Result<FetchedChunk, DfsError> {
        let url = format!("{}/api/v1/chunks/{}", base_url.trim_end_matches('/'), chunk_id);

        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| unreachable_error(base_url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(base_url, status, &body));
        }

        let checksum = response
            .headers()
            .get(CHUNK_CHECKSUM_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map_err(|e| unreachable_error(base_url, &e))?
            .to_vec();

        Ok(FetchedChunk { data, checksum })
    }

    /// Deletes a chunk; `Ok(false)` when the node did not hold it.
    pub async fn delete_chunk(
        &self,
        base_url: &str,
        chunk_id: ChunkId,
        timeout: Duration,
    ) -> Result<bool, DfsError> {
        let url = format!("{}/api/v1/chunks/{}", base_url.trim_end_matches('/'), chunk_id);

        let response = self
            .http
            .delete(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| unreachable_error(base_url, &e))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(base_url, s, &body))
            }
        }
    }
}

impl Default for NodeClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a pipeline tail as pipe-separated `host:port` entries, stripping
/// URL schemes.
pub fn encode_tail(urls: &[String]) -> String {
    urls.iter()
        .map(|u| {
            u.trim_start_matches("http://")
                .trim_start_matches("https://")
                .trim_end_matches('/')
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Parses a `replicate_to` value back into base URLs, head first.
pub fn decode_tail(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with("http://") || s.starts_with("https://") {
                s.trim_end_matches('/').to_string()
            } else {
                format!("http://{}", s)
            }
        })
        .collect()
}

fn unreachable_error(base_url: &str, err: &reqwest::Error) -> DfsError {
    if err.is_timeout() {
        DfsError::NodeUnreachable(format!("{}: deadline exceeded", base_url))
    } else {
        DfsError::NodeUnreachable(format!("{}: {}", base_url, err))
    }
}

fn status_error(base_url: &str, status: reqwest::StatusCode, body: &str) -> DfsError {
    let excerpt: String = body.chars().take(200).collect();
    match status {
        reqwest::StatusCode::NOT_FOUND => {
            DfsError::NotFound(format!("{}: {}", base_url, excerpt))
        }
        s if s.is_server_error() && excerpt.contains("checksum") => {
            DfsError::Corrupted(format!("{}: {}", base_url, excerpt))
        }
        s => DfsError::NodeUnreachable(format!("{}: HTTP {} {}", base_url, s.as_u16(), excerpt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tail_strips_schemes() {
        let tail = vec![
            "http://10.0.0.2:8001".to_string(),
            "10.0.0.3:8001".to_string(),
        ];
        assert_eq!(encode_tail(&tail), "10.0.0.2:8001|10.0.0.3:8001");
    }

    #[test]
    fn test_decode_tail_restores_urls() {
        let urls = decode_tail("10.0.0.2:8001|http://10.0.0.3:8001|  |");
        assert_eq!(urls, vec!["http://10.0.0.2:8001", "http://10.0.0.3:8001"]);
    }

    #[test]
    fn test_tail_round_trip() {
        let tail = vec!["http://a:1".to_string(), "http://b:2".to_string()];
        assert_eq!(decode_tail(&encode_tail(&tail)), tail);
    }

    #[test]
    fn test_empty_tail_decodes_empty() {
        assert!(decode_tail("").is_empty());
    }
}
