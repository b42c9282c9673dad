// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for pipeline configuration.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while validating a pipeline configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// The update interval is not one of the supported values.
    #[error("Unsupported update interval {interval:?}; supported: {supported}")]
    UnsupportedUpdateInterval {
        /// The rejected interval.
        interval: Duration,
        /// Human-readable list of supported intervals.
        supported: String,
    },

    /// A size parameter must be strictly positive.
    #[error("'{parameter}' must be greater than zero")]
    ZeroSize {
        /// Name of the offending parameter.
        parameter: &'static str,
    },

    /// The two OTLP ports must differ when the receiver is enabled.
    #[error("OTLP gRPC and HTTP ports must differ (both set to {port})")]
    PortCollision {
        /// The duplicated port.
        port: u16,
    },
}
