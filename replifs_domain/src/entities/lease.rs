// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Lease Entity
//!
//! A time-bounded exclusive claim on a virtual path for one mutating
//! operation. The invariant the metadata store enforces is: for any
//! `(path, instant)` at most one lease with `expires_at > instant` exists.
//! Expired leases are garbage, removed lazily on acquisition and eagerly by
//! the sweeper.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{LeaseId, VirtualPath};

/// The mutating operation a lease covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseOperation {
    Write,
    Delete,
}

impl std::fmt::Display for LeaseOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseOperation::Write => write!(f, "write"),
            LeaseOperation::Delete => write!(f, "delete"),
        }
    }
}

/// One lease row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: LeaseId,
    pub path: VirtualPath,
    pub operation: LeaseOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a lease expiring `ttl` after `now`.
    pub fn new(
        path: VirtualPath,
        operation: LeaseOperation,
        client_id: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            lease_id: LeaseId::new(),
            path,
            operation,
            client_id,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Extends the lease to `ttl` past `now`. Renewal never shortens an
    /// existing grant.
    pub fn renew(&mut self, ttl: Duration, now: DateTime<Utc>) {
        let candidate = now + ttl;
        if candidate > self.expires_at {
            self.expires_at = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let lease = Lease::new(
            VirtualPath::parse("/x").unwrap(),
            LeaseOperation::Write,
            None,
            Duration::seconds(300),
            now,
        );
        assert!(!lease.is_expired(now));
        assert!(!lease.is_expired(now + Duration::seconds(299)));
        assert!(lease.is_expired(now + Duration::seconds(300)));
    }

    #[test]
    fn test_renew_never_shortens() {
        let now = Utc::now();
        let mut lease = Lease::new(
            VirtualPath::parse("/x").unwrap(),
            LeaseOperation::Write,
            None,
            Duration::seconds(300),
            now,
        );
        let original = lease.expires_at;

        lease.renew(Duration::seconds(10), now);
        assert_eq!(lease.expires_at, original);

        lease.renew(Duration::seconds(600), now);
        assert_eq!(lease.expires_at, now + Duration::seconds(600));
    }
}
