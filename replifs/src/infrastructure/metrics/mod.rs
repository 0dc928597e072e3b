// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics
//!
//! Prometheus instrumentation for both services. Each process owns one
//! registry wrapped in a typed struct, so call sites increment fields
//! instead of looking metrics up by name; `/metrics` renders the registry
//! in the text exposition format.

pub mod metadata_metrics;
pub mod node_metrics;

pub use metadata_metrics::MetadataMetrics;
pub use node_metrics::NodeMetrics;

use prometheus::{Encoder, Registry, TextEncoder};

use replifs_domain::DfsError;

/// Renders a registry in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String, DfsError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| DfsError::Internal(format!("encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| DfsError::Internal(format!("metrics utf8: {}", e)))
}
