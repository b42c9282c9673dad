// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration value objects for the log analysis pipeline.
//!
//! A [`PipelineConfig`] is built once at startup (from CLI flags and
//! environment variables) and then passed by value into the constructors
//! that need it. There is no module-level mutable configuration state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

pub mod error;

/// Default capacity of the three frequency maps (words, phrases, attributes).
pub const DEFAULT_MEMORY_SIZE: usize = 10_000;

/// Default capacity of the bounded in-memory log buffer.
pub const DEFAULT_LOG_BUFFER: usize = 1_000;

/// Default aggregation tick interval.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Default port of the OTLP gRPC logs service.
pub const DEFAULT_OTLP_GRPC_PORT: u16 = 4317;

/// Default port of the OTLP HTTP logs endpoint.
pub const DEFAULT_OTLP_HTTP_PORT: u16 = 4318;

/// Default cap on distinct values tracked per attribute key in the
/// lifetime value histograms.
pub const DEFAULT_MAX_ATTRIBUTE_VALUES: usize = 10_000;

/// The set of update intervals the aggregation tick accepts.
pub const SUPPORTED_UPDATE_INTERVALS: [Duration; 7] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

/// Immutable configuration for the whole ingestion-and-analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Shared capacity of each frequency map before pruning kicks in.
    pub memory_size: usize,

    /// Aggregation tick interval. Must be one of
    /// [`SUPPORTED_UPDATE_INTERVALS`].
    pub update_interval: Duration,

    /// Capacity of the bounded log buffer retained for inspection.
    pub log_buffer: usize,

    /// File paths or glob patterns to ingest. Empty means no file sources.
    pub files: Vec<String>,

    /// Keep watching files for appended lines and rotations.
    pub follow: bool,

    /// Serve the OTLP logs receiver (gRPC + HTTP).
    pub otlp_enabled: bool,

    /// Port of the OTLP gRPC logs service.
    pub otlp_grpc_port: u16,

    /// Port of the OTLP HTTP logs endpoint.
    pub otlp_http_port: u16,

    /// Additional stop words merged into the analyzer's built-in list.
    pub stop_words: Vec<String>,

    /// Optional custom format definition file (YAML).
    pub format_file: Option<PathBuf>,

    /// Cap on distinct values tracked per attribute key in lifetime
    /// histograms. Counts for values already tracked keep accruing past
    /// the cap; novel values are no longer added to the histogram.
    pub max_attribute_values: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            memory_size: DEFAULT_MEMORY_SIZE,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            log_buffer: DEFAULT_LOG_BUFFER,
            files: Vec::new(),
            follow: false,
            otlp_enabled: false,
            otlp_grpc_port: DEFAULT_OTLP_GRPC_PORT,
            otlp_http_port: DEFAULT_OTLP_HTTP_PORT,
            stop_words: Vec::new(),
            format_file: None,
            max_attribute_values: DEFAULT_MAX_ATTRIBUTE_VALUES,
        }
    }
}

impl PipelineConfig {
    /// Validates the configuration, returning it unchanged on success.
    pub fn validated(self) -> Result<Self, Error> {
        if !SUPPORTED_UPDATE_INTERVALS.contains(&self.update_interval) {
            return Err(Error::UnsupportedUpdateInterval {
                interval: self.update_interval,
                supported: "500ms, 1s, 2s, 5s, 10s, 30s, 1m".to_owned(),
            });
        }
        if self.memory_size == 0 {
            return Err(Error::ZeroSize {
                parameter: "memory-size",
            });
        }
        if self.log_buffer == 0 {
            return Err(Error::ZeroSize {
                parameter: "log-buffer",
            });
        }
        if self.max_attribute_values == 0 {
            return Err(Error::ZeroSize {
                parameter: "max-attribute-values",
            });
        }
        if self.otlp_enabled && self.otlp_grpc_port == self.otlp_http_port {
            return Err(Error::PortCollision {
                port: self.otlp_grpc_port,
            });
        }
        Ok(self)
    }

    /// True when at least one input source is configured.
    ///
    /// Stdin is always a source, so a pipeline is never sourceless in
    /// practice; this reports whether anything beyond stdin is set up.
    #[must_use]
    pub fn has_extra_sources(&self) -> bool {
        !self.files.is_empty() || self.otlp_enabled
    }
}
