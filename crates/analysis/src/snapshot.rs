// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! The immutable snapshot envelope published to readers.
//!
//! A snapshot is a plain value: building one deep-copies every view the
//! consumer maintains, so readers can hold it for as long as they like
//! while ingestion keeps moving.

use serde::Serialize;
use std::collections::BTreeMap;

use tailscope_pdata::record::LogRecord;

use crate::counters::{HeatmapMinute, LifetimeSnapshot, SeverityCounts};
use crate::drain::PatternSummary;
use crate::frequency::{AttributeStats, FrequencyEntry};

/// Template engine statistics: `(cluster_count, total_observations)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TemplateStats {
    /// Live clusters in the engine.
    pub cluster_count: usize,
    /// Messages observed since the last reset.
    pub total_observations: u64,
}

/// Ingestion throughput statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    /// Records counted in the current (incomplete) tick interval.
    pub logs_this_interval: u64,
    /// Records counted since process start; monotonic.
    pub total_logs_ever: u64,
    /// Raw bytes counted since process start; monotonic.
    pub total_bytes: u64,
    /// Highest observed per-second record count; monotonic.
    pub peak_logs_per_sec: u64,
    /// The last ten per-second record counts, oldest first.
    pub recent_seconds: Vec<u64>,
    /// Input sources currently attached.
    pub active_sources: usize,
}

/// One consistent view of all analytic state at a single instant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Word frequencies, by (count desc, term asc).
    pub words: Vec<FrequencyEntry>,
    /// Phrase frequencies, by (count desc, term asc).
    pub phrases: Vec<FrequencyEntry>,
    /// Attribute key statistics, by (unique-value count desc, key asc).
    pub attributes: Vec<AttributeStats>,
    /// Counts of the current (incomplete) tick interval.
    pub severity: SeverityCounts,
    /// Completed tick intervals, oldest first.
    pub counts_history: Vec<SeverityCounts>,
    /// The sixty-minute heatmap display window.
    pub heatmap: Vec<HeatmapMinute>,
    /// The bounded log buffer contents, oldest first, unfiltered.
    pub log_buffer: Vec<LogRecord>,
    /// Lifetime counters.
    pub lifetime: LifetimeSnapshot,
    /// Per-severity service histograms (top ten per severity).
    pub services_by_severity: BTreeMap<String, BTreeMap<String, u64>>,
    /// Global template patterns.
    pub patterns_global: Vec<PatternSummary>,
    /// Per-severity template patterns, keyed by severity token.
    pub patterns_by_severity: BTreeMap<String, Vec<PatternSummary>>,
    /// Global template engine statistics.
    pub template_stats: TemplateStats,
    /// Ingestion throughput statistics.
    pub ingestion: IngestionStats,
    /// Whether analysis was paused when the snapshot was taken.
    pub paused: bool,
}
