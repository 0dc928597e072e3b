// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Virtual Path Value Object
//!
//! The client-facing name of a file inside the store. Virtual paths are a
//! flat namespace with `/`-separated components; they never touch a real
//! filesystem, but they are used as lease keys and database keys, so the
//! canonical form matters:
//!
//! - always absolute (leading `/` added if missing)
//! - no empty components, no `.` or `..` components
//! - no trailing slash (except the root itself, which is not a valid file
//!   path)
//!
//! Uniqueness among non-deleted files is enforced by the metadata store; this
//! type only guarantees that two spellings of the same name normalize to the
//! same key.

use serde::{Deserialize, Serialize};

use crate::DfsError;

/// Canonicalized virtual path of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// Parses and canonicalizes a client-supplied path.
    ///
    /// # Errors
    /// `DfsError::ConfigurationFailure` when the path is empty, resolves to
    /// the root, or contains `.`/`..` components.
    pub fn parse(raw: &str) -> Result<Self, DfsError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DfsError::ConfigurationFailure("path cannot be empty".to_string()));
        }

        let mut components = Vec::new();
        for part in trimmed.split('/') {
            match part {
                "" => continue,
                "." | ".." => {
                    return Err(DfsError::ConfigurationFailure(format!(
                        "path '{}' contains relative components",
                        raw
                    )));
                }
                other => components.push(other),
            }
        }

        if components.is_empty() {
            return Err(DfsError::ConfigurationFailure(format!(
                "path '{}' does not name a file",
                raw
            )));
        }

        Ok(Self(format!("/{}", components.join("/"))))
    }

    /// The canonical string form (always starts with `/`).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this path starts with the given prefix, component-aware
    /// enough for listing (plain string prefix, as the metadata store
    /// queries do).
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl std::fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for VirtualPath {
    type Err = DfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
