// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for pipeline initialization and the I/O perimeter.

use thiserror::Error;

/// Errors that abort pipeline startup. Everything softer (unreadable
/// paths, empty globs, watcher failures) skips the source and surfaces
/// as a [`crate::diag::Diagnostic`] instead; per-line faults degrade
/// inside the normalizer.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable input source remained after expansion and skipping.
    #[error("No usable input sources; nothing to ingest")]
    NoSources,

    /// Binding an OTLP endpoint failed; startup aborts.
    #[error("Failed to bind OTLP {endpoint} endpoint on '{addr}': {details}")]
    BindFailed {
        /// Which endpoint (`gRPC` or `HTTP`).
        endpoint: &'static str,
        /// The address we attempted to bind.
        addr: String,
        /// Human-readable details of the bind failure.
        details: String,
    },
}
