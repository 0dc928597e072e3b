// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logging Initialization
//!
//! Sets up the `tracing` subscriber for a replifs process. Filtering follows
//! the usual precedence: an explicit `RUST_LOG` wins, otherwise the
//! verbosity flags pick a default level. The service name is attached so
//! multi-process logs (metadata + several nodes on one host) stay
//! attributable.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `verbosity` counts `-v` flags: 0 → info, 1 → debug, 2+ → trace.
/// Safe to call more than once per process; only the first call installs a
/// subscriber (tests initialize eagerly from several entry points).
pub fn init_tracing(service: &str, verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},sqlx=warn,hyper=warn,reqwest=warn", default_level))
    });

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    if result.is_ok() {
        tracing::info!(service = service, "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_reentrant() {
        init_tracing("test", 0);
        init_tracing("test", 2);
    }
}
