// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Lease Manager
//!
//! Per-path exclusion for mutating operations. The persistent lease table
//! is the source of truth (the metadata store enforces the one-live-lease
//! invariant); this service adds the ergonomics the API paths need:
//!
//! - non-blocking acquisition that surfaces `Conflict` immediately -
//!   callers implement their own wait policy
//! - a [`LeaseGuard`] so every exit path (success, error, panic) releases
//!   the lease
//! - the periodic sweep that deletes expired rows
//!
//! Leases are advisory within the metadata service: every mutating API
//! path acquires the appropriate lease before touching metadata.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use replifs_bootstrap::shutdown::CancellationToken;
use replifs_domain::{DfsError, Lease, LeaseId, LeaseOperation, MetadataStore, VirtualPath};

/// Lease acquisition, renewal, and sweeping over the metadata store.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn MetadataStore>,
    default_ttl: chrono::Duration,
    sweep_interval: std::time::Duration,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        default_ttl: chrono::Duration,
        sweep_interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            default_ttl,
            sweep_interval,
        }
    }

    /// Acquires a lease, returning a guard that releases it when the
    /// operation finishes. Non-blocking: a held path fails with `Conflict`
    /// right away.
    pub async fn acquire(
        &self,
        path: &VirtualPath,
        operation: LeaseOperation,
        client_id: Option<String>,
        ttl: Option<chrono::Duration>,
    ) -> Result<LeaseGuard, DfsError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let lease = self
            .store
            .try_acquire_lease(path, operation, client_id, ttl, Utc::now())
            .await?;
        debug!("Lease acquired: {} ({}, {})", path, operation, lease.lease_id);
        Ok(LeaseGuard {
            store: self.store.clone(),
            lease,
            released: false,
        })
    }

    /// Renews a live lease by id.
    pub async fn renew(
        &self,
        lease_id: LeaseId,
        ttl: Option<chrono::Duration>,
    ) -> Result<Lease, DfsError> {
        self.store
            .renew_lease(lease_id, ttl.unwrap_or(self.default_ttl), Utc::now())
            .await
    }

    /// Releases a lease by id; false when it was not held.
    pub async fn release(&self, lease_id: LeaseId) -> Result<bool, DfsError> {
        let released = self.store.release_lease(lease_id).await?;
        if released {
            debug!("Lease released: {}", lease_id);
        } else {
            warn!("Lease {} was not held at release", lease_id);
        }
        Ok(released)
    }

    /// Periodic sweep of expired leases. Runs until the token cancels;
    /// iteration errors are logged and the loop continues.
    pub async fn run_sweeper(&self, token: CancellationToken) {
        info!("Lease sweeper started (every {:?})", self.sweep_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.sweep_interval) => {}
            }
            match self.store.delete_expired_leases(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => debug!("Lease sweeper removed {} expired lease(s)", n),
                Err(e) => error!("Lease sweep failed: {}", e),
            }
        }
        info!("Lease sweeper stopped");
    }
}

/// Holds a lease for the duration of one mutating operation.
///
/// Call [`LeaseGuard::release`] on the normal path. If the guard is dropped
/// without release (error return, panic unwind), the release is spawned in
/// the background so the path does not stay locked until TTL expiry.
pub struct LeaseGuard {
    store: Arc<dyn MetadataStore>,
    lease: Lease,
    released: bool,
}

impl std::fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("lease", &self.lease)
            .field("released", &self.released)
            .finish()
    }
}

impl LeaseGuard {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease.lease_id
    }

    /// Releases the lease now.
    pub async fn release(mut self) -> Result<bool, DfsError> {
        self.released = true;
        self.store.release_lease(self.lease.lease_id).await
    }

    /// Keeps the lease alive past this guard (upload-init hands the lease
    /// over to commit).
    pub fn persist(mut self) -> Lease {
        self.released = true;
        self.lease.clone()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let lease_id = self.lease.lease_id;
        // Async release from a sync Drop: fire-and-forget on the runtime if
        // one is still around; otherwise TTL expiry collects the lease.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = store.release_lease(lease_id).await {
                    warn!("Background lease release for {} failed: {}", lease_id, e);
                }
            });
        }
    }
}
