// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metadata Service Client
//!
//! Outbound HTTP to the metadata service API, used by the storage node
//! (heartbeats, registration) and by the client library (upload protocol,
//! lookups, proxy transfers). Thin request/response plumbing over the wire
//! types; no protocol logic lives here.

use std::time::Duration;

use reqwest::multipart;
use tracing::debug;

use replifs_domain::{
    ChunkId, DfsError, FileMetadata, HeartbeatSample, LeaseId, NodeInfo, NodeRegistration,
};

use crate::wire::{
    CommitRequest, CommitResponse, DeleteResponse, HeartbeatResponse, LeaseAcquireRequest,
    LeaseReleaseRequest, LeaseReleaseResponse, LeaseRenewRequest, LeaseResponse, RegisterResponse,
    StatsResponse, StoreChunkReply, UploadInitRequest, UploadInitResponse,
};

/// Connection-pooled client for the metadata service.
#[derive(Clone)]
pub struct MetadataClient {
    base_url: String,
    http: reqwest::Client,
}

impl MetadataClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    // ---- node-side -------------------------------------------------------

    /// Sends one heartbeat. Deadline per the protocol: 10s default.
    pub async fn heartbeat(
        &self,
        sample: &HeartbeatSample,
        timeout: Duration,
    ) -> Result<HeartbeatResponse, DfsError> {
        self.post_json("/nodes/heartbeat", sample, timeout).await
    }

    /// Registers the node ahead of its first heartbeat.
    pub async fn register(
        &self,
        registration: &NodeRegistration,
        timeout: Duration,
    ) -> Result<RegisterResponse, DfsError> {
        self.post_json("/nodes/register", registration, timeout).await
    }

    // ---- client-side -----------------------------------------------------

    pub async fn upload_init(
        &self,
        request: &UploadInitRequest,
        timeout: Duration,
    ) -> Result<UploadInitResponse, DfsError> {
        self.post_json("/files/upload-init", request, timeout).await
    }

    pub async fn commit(
        &self,
        request: &CommitRequest,
        timeout: Duration,
    ) -> Result<CommitResponse, DfsError> {
        self.post_json("/files/commit", request, timeout).await
    }

    pub async fn get_file(&self, path: &str, timeout: Duration) -> Result<FileMetadata, DfsError> {
        let url = self.url(&format!("/files{}", ensure_leading_slash(path)));
        self.get_json(&url, timeout).await
    }

    pub async fn list_files(
        &self,
        prefix: Option<&str>,
        limit: u32,
        offset: u32,
        timeout: Duration,
    ) -> Result<Vec<FileMetadata>, DfsError> {
        let mut url = format!("{}?limit={}&offset={}", self.url("/files"), limit, offset);
        if let Some(prefix) = prefix {
            url.push_str(&format!("&prefix={}", prefix));
        }
        self.get_json(&url, timeout).await
    }

    pub async fn delete_file(
        &self,
        path: &str,
        permanent: bool,
        timeout: Duration,
    ) -> Result<DeleteResponse, DfsError> {
        let url = format!(
            "{}?permanent={}",
            self.url(&format!("/files{}", ensure_leading_slash(path))),
            permanent
        );
        let response = self
            .http
            .delete(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        Self::decode(response).await
    }

    pub async fn list_nodes(&self, timeout: Duration) -> Result<Vec<NodeInfo>, DfsError> {
        self.get_json(&self.url("/nodes"), timeout).await
    }

    pub async fn stats(&self, timeout: Duration) -> Result<StatsResponse, DfsError> {
        self.get_json(&self.url("/stats"), timeout).await
    }

    // ---- leases ----------------------------------------------------------

    pub async fn acquire_lease(
        &self,
        request: &LeaseAcquireRequest,
        timeout: Duration,
    ) -> Result<LeaseResponse, DfsError> {
        self.post_json("/leases/acquire", request, timeout).await
    }

    pub async fn release_lease(
        &self,
        lease_id: LeaseId,
        timeout: Duration,
    ) -> Result<LeaseReleaseResponse, DfsError> {
        self.post_json("/leases/release", &LeaseReleaseRequest { lease_id }, timeout)
            .await
    }

    pub async fn renew_lease(
        &self,
        lease_id: LeaseId,
        ttl_seconds: Option<u64>,
        timeout: Duration,
    ) -> Result<LeaseResponse, DfsError> {
        self.post_json(
            "/leases/renew",
            &LeaseRenewRequest { lease_id, ttl_seconds },
            timeout,
        )
        .await
    }

    // ---- proxy -----------------------------------------------------------

    /// Uploads a chunk through the metadata proxy, for clients without
    /// direct reachability to storage nodes.
    pub async fn proxy_store_chunk(
        &self,
        chunk_id: ChunkId,
        payload: Vec<u8>,
        target_node_ids: &[String],
        timeout: Duration,
    ) -> Result<StoreChunkReply, DfsError> {
        let url = format!(
            "{}?target_nodes={}",
            self.url(&format!("/proxy/chunks/{}", chunk_id)),
            target_node_ids.join(",")
        );
        let part = multipart::Part::bytes(payload)
            .file_name("chunk")
            .mime_str("application/octet-stream")
            .map_err(|e| DfsError::Internal(format!("multipart: {}", e)))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .put(&url)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        Self::decode(response).await
    }

    /// Downloads a chunk through the metadata proxy.
    pub async fn proxy_fetch_chunk(
        &self,
        chunk_id: ChunkId,
        file_path: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, DfsError> {
        let url = format!(
            "{}?file_path={}",
            self.url(&format!("/proxy/chunks/{}", chunk_id)),
            file_path
        );
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, &body));
        }
        Ok(response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&e))?
            .to_vec())
    }

    // ---- plumbing --------------------------------------------------------

    async fn post_json<B: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<R, DfsError> {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        Self::decode(response).await
    }

    async fn get_json<R: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<R, DfsError> {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        Self::decode(response).await
    }

    async fn decode<R: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<R, DfsError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| DfsError::SerializationFailure(format!("metadata reply: {}", e)));
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }

    fn transport_error(&self, err: &reqwest::Error) -> DfsError {
        if err.is_timeout() {
            DfsError::NodeUnreachable(format!("{}: deadline exceeded", self.base_url))
        } else {
            DfsError::NodeUnreachable(format!("{}: {}", self.base_url, err))
        }
    }

    fn status_error(&self, status: reqwest::StatusCode, body: &str) -> DfsError {
        map_status(status, body)
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Maps an error response back to the error kind the server encoded.
fn map_status(status: reqwest::StatusCode, body: &str) -> DfsError {
    let excerpt: String = body.chars().take(300).collect();
    use reqwest::StatusCode as S;
    match status {
        S::NOT_FOUND => DfsError::NotFound(excerpt),
        S::CONFLICT => DfsError::Conflict(excerpt),
        S::SERVICE_UNAVAILABLE => DfsError::InsufficientNodes(excerpt),
        S::UNAUTHORIZED | S::FORBIDDEN => DfsError::SecurityFailure(excerpt),
        S::BAD_REQUEST => DfsError::MetadataFailure(excerpt),
        S::BAD_GATEWAY | S::GATEWAY_TIMEOUT => DfsError::NodeUnreachable(excerpt),
        s => DfsError::Internal(format!("HTTP {}: {}", s.as_u16(), excerpt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_composition() {
        let client = MetadataClient::new("http://meta:8000/");
        assert_eq!(client.url("/files/commit"), "http://meta:8000/api/v1/files/commit");
    }

    #[test]
    fn test_leading_slash_normalization() {
        assert_eq!(ensure_leading_slash("a/b"), "/a/b");
        assert_eq!(ensure_leading_slash("/a/b"), "/a/b");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(reqwest::StatusCode::CONFLICT, "lease"),
            DfsError::Conflict(_)
        ));
        assert!(matches!(
            map_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "nodes"),
            DfsError::InsufficientNodes(_)
        ));
        assert!(matches!(
            map_status(reqwest::StatusCode::UNAUTHORIZED, "token"),
            DfsError::SecurityFailure(_)
        ));
    }
}
