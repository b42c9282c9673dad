// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! The pipeline consumer: the single owner of all analytic state.
//!
//! One task pulls logical lines off the unified channel and advances
//! frequency memory, severity bookkeeping, the template engines and the
//! bounded buffer, with no locks anywhere on the hot path. Aggregation ticks
//! and control messages interleave only between records, never inside
//! one, so every published view cuts the stream at a record boundary.

use chrono::Utc;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tailscope_analysis::buffer::BoundedLogBuffer;
use tailscope_analysis::counters::{
    CountsHistory, Heatmap, LifetimeCounters, ServiceHistograms, SeverityCounts,
};
use tailscope_analysis::drain::TemplateEngines;
use tailscope_analysis::frequency::FrequencyMemory;
use tailscope_analysis::snapshot::{IngestionStats, Snapshot, TemplateStats};
use tailscope_analysis::text::TextAnalyzer;
use tailscope_config::PipelineConfig;
use tailscope_pdata::formatdef::CompiledFormat;
use tailscope_pdata::normalize::Normalizer;
use tailscope_pdata::record::LogRecord;

use crate::publish::SnapshotPublisher;
use crate::reassembly::JsonReassembler;

/// Per-second ring length in [`IngestionStats::recent_seconds`].
const RECENT_SECONDS_CAP: usize = 10;

static SIGNAL_TAB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\t(logs|metrics|traces)\t").expect("signal tab regex is valid")
});

/// Meta-log phrases an OTLP collector emits about its own pipelines.
const COLLECTOR_PHRASES: [&str; 6] = [
    "resource metrics",
    "resource traces",
    "data points",
    "metrics exported",
    "traces exported",
    "spans exported",
];

/// Detects the collector's own telemetry meta-logs, which would otherwise
/// pollute every analytic view. Filtered lines advance no counters.
#[must_use]
pub fn is_otlp_signal_log(raw: &str) -> bool {
    let has_component = raw.contains("otelcol.component");
    if has_component && SIGNAL_TAB_RE.is_match(raw) {
        return true;
    }
    if raw.contains("otelcol.signal")
        && (raw.contains("\"metrics\"") || raw.contains("\"traces\""))
    {
        return true;
    }
    has_component && COLLECTOR_PHRASES.iter().any(|phrase| raw.contains(phrase))
}

/// Control messages accepted by the consumer between records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMsg {
    /// Defer analysis stages; keep buffering and lifetime accounting.
    Pause,
    /// Replay deferred records and resume full analysis.
    Resume,
    /// Clear frequency memory and all template engines. Lifetime counters
    /// and the log buffer survive.
    Reset,
}

/// The consumer task state. Constructed by the supervisor, consumed by
/// [`Consumer::run`].
pub struct Consumer {
    normalizer: Normalizer,
    analyzer: TextAnalyzer,
    frequency: FrequencyMemory,
    engines: TemplateEngines,
    severity_counts: SeverityCounts,
    counts_history: CountsHistory,
    heatmap: Heatmap,
    lifetime: LifetimeCounters,
    services: ServiceHistograms,
    buffer: BoundedLogBuffer,
    reassembler: JsonReassembler,
    /// Records awaiting the deferred analysis stages while paused.
    /// Unbounded: resume must replay every record taken in during the
    /// pause, however long it lasted.
    deferred: VecDeque<LogRecord>,
    paused: bool,
    log_count_interval: u64,
    logs_this_second: u64,
    recent_seconds: VecDeque<u64>,
    total_logs_ever: u64,
    total_bytes: u64,
    peak_logs_per_sec: u64,
    active_sources: usize,
    publisher: SnapshotPublisher,
}

impl Consumer {
    /// Builds a consumer from the pipeline configuration.
    #[must_use]
    pub fn new(
        config: &PipelineConfig,
        format: Option<CompiledFormat>,
        publisher: SnapshotPublisher,
        active_sources: usize,
    ) -> Consumer {
        let normalizer = match format {
            Some(format) => Normalizer::with_format(format),
            None => Normalizer::new(),
        };
        Consumer {
            normalizer,
            analyzer: TextAnalyzer::new(&config.stop_words),
            frequency: FrequencyMemory::new(config.memory_size),
            engines: TemplateEngines::default(),
            severity_counts: SeverityCounts::default(),
            counts_history: CountsHistory::default(),
            heatmap: Heatmap::default(),
            lifetime: LifetimeCounters::new(config.max_attribute_values),
            services: ServiceHistograms::default(),
            buffer: BoundedLogBuffer::new(config.log_buffer),
            reassembler: JsonReassembler::new(),
            deferred: VecDeque::new(),
            paused: false,
            log_count_interval: 0,
            logs_this_second: 0,
            recent_seconds: VecDeque::with_capacity(RECENT_SECONDS_CAP),
            total_logs_ever: 0,
            total_bytes: 0,
            peak_logs_per_sec: 0,
            active_sources,
            publisher,
        }
    }

    /// Runs until every producer has closed the line channel (or
    /// cancellation drains it), then publishes a final snapshot.
    pub async fn run(
        mut self,
        mut lines: mpsc::Receiver<String>,
        mut control: mpsc::Receiver<ControlMsg>,
        cancel: CancellationToken,
        interval: Duration,
    ) {
        let mut tick = tokio::time::interval_at(Instant::now() + interval, interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut draining = false;
        loop {
            tokio::select! {
                biased;

                Some(msg) = control.recv() => self.handle_control(msg),

                _ = cancel.cancelled(), if !draining => {
                    // Producers are shutting down; keep consuming until
                    // they all close.
                    draining = true;
                }

                maybe_line = lines.recv() => match maybe_line {
                    Some(line) => self.ingest_line(&line),
                    None => break,
                },

                _ = tick.tick() => self.handle_tick(),
            }
        }
        if let Some(pending) = self.reassembler.take_pending() {
            self.process_logical(&pending);
        }
        self.publish_snapshot();
        debug!(
            total_logs = self.total_logs_ever,
            total_bytes = self.total_bytes,
            "consumer finished"
        );
    }

    /// Feeds one physical line through reassembly, then analysis.
    pub fn ingest_line(&mut self, raw: &str) {
        if let Some(logical) = self.reassembler.push(raw) {
            self.process_logical(&logical);
        }
    }

    /// Applies one logical line to all analytic state.
    fn process_logical(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if is_otlp_signal_log(line) {
            return;
        }
        for record in self.normalizer.normalize_at(line, Utc::now()) {
            self.apply_record(record);
        }
    }

    fn apply_record(&mut self, record: LogRecord) {
        self.log_count_interval += 1;
        self.logs_this_second += 1;
        self.total_logs_ever += 1;
        self.total_bytes += record.raw_line.len() as u64;

        self.severity_counts.add(record.severity);
        self.heatmap.record(record.severity, record.receive_time);
        self.services.record(record.severity, &record);
        self.lifetime.record_structure(&record);

        if self.paused {
            self.buffer.push(record.clone());
            self.deferred.push_back(record);
            return;
        }

        self.analyze_record(&record);
        self.buffer.push(record);
    }

    /// The deferrable stages: tokenization, frequency memory, per-word
    /// lifetime counts and template clustering.
    fn analyze_record(&mut self, record: &LogRecord) {
        let analyzed = self.analyzer.analyze(&record.message);
        self.frequency
            .add_words(analyzed.words.iter().map(String::as_str), record.receive_time);
        self.frequency.add_phrases(
            analyzed.phrases.iter().map(String::as_str),
            record.receive_time,
        );
        self.frequency
            .add_attributes(&record.attributes, record.receive_time);
        self.lifetime.record_words(&analyzed.words);
        self.engines.observe(record.severity, &record.message);
    }

    fn handle_control(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Pause => {
                self.paused = true;
            }
            ControlMsg::Resume => {
                if self.paused {
                    self.paused = false;
                    let deferred: Vec<LogRecord> = self.deferred.drain(..).collect();
                    for record in &deferred {
                        self.analyze_record(record);
                    }
                    self.publish_snapshot();
                }
            }
            ControlMsg::Reset => {
                self.frequency.reset();
                self.engines.reset();
                self.deferred.clear();
                self.publish_snapshot();
            }
        }
    }

    /// Closes the current aggregation window and opens the next one.
    pub fn handle_tick(&mut self) {
        self.counts_history.push(self.severity_counts);
        self.recent_seconds.push_back(self.logs_this_second);
        while self.recent_seconds.len() > RECENT_SECONDS_CAP {
            let _ = self.recent_seconds.pop_front();
        }
        self.peak_logs_per_sec = self.peak_logs_per_sec.max(self.logs_this_second);
        self.log_count_interval = 0;
        self.logs_this_second = 0;
        self.severity_counts = SeverityCounts::default();
        self.publish_snapshot();
    }

    /// Builds and publishes a snapshot of all views at this instant.
    pub fn publish_snapshot(&mut self) {
        let frequency = self.frequency.snapshot();
        let (cluster_count, total_observations) = self.engines.global().stats();
        let snapshot = Snapshot {
            words: frequency.words,
            phrases: frequency.phrases,
            attributes: frequency.attributes,
            severity: self.severity_counts,
            counts_history: self.counts_history.entries(),
            heatmap: self.heatmap.display_window(Utc::now()),
            log_buffer: self.buffer.contents(),
            lifetime: self.lifetime.snapshot(),
            services_by_severity: self.services.snapshot(),
            patterns_global: self.engines.global().top_patterns(0),
            patterns_by_severity: self.engines.patterns_by_severity(0),
            template_stats: TemplateStats {
                cluster_count,
                total_observations,
            },
            ingestion: IngestionStats {
                logs_this_interval: self.log_count_interval,
                total_logs_ever: self.total_logs_ever,
                total_bytes: self.total_bytes,
                peak_logs_per_sec: self.peak_logs_per_sec,
                recent_seconds: self.recent_seconds.iter().copied().collect(),
                active_sources: self.active_sources,
            },
            paused: self.paused,
        };
        self.publisher.publish(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{SnapshotHandle, snapshot_slot};
    use pretty_assertions::assert_eq;
    use tailscope_pdata::severity::Severity;

    fn consumer() -> (Consumer, SnapshotHandle) {
        let (publisher, handle) = snapshot_slot();
        let config = PipelineConfig::default();
        (Consumer::new(&config, None, publisher, 1), handle)
    }

    #[test]
    fn signal_log_filter_matches_collector_meta_logs() {
        assert!(is_otlp_signal_log(
            "2024-01-15T10:00:00Z\tinfo\tlogs\texporterhelper {\"otelcol.component\": \"otlp\"}"
        ));
        assert!(is_otlp_signal_log(
            r#"{"otelcol.signal": "metrics", "msg": "exported"}"#
        ));
        assert!(is_otlp_signal_log(
            r#"metrics exported {"otelcol.component": "exporter"}"#
        ));
        assert!(!is_otlp_signal_log("ERROR disk full"));
        // Phrases without the component marker stay.
        assert!(!is_otlp_signal_log("resource metrics look fine"));
    }

    #[test]
    fn plain_text_line_advances_all_views() {
        let (mut consumer, handle) = consumer();
        consumer.ingest_line("2024-01-15T10:00:00Z ERROR disk full /dev/sda1");
        consumer.handle_tick();

        let snapshot = handle.load();
        assert_eq!(snapshot.ingestion.total_logs_ever, 1);
        let last = snapshot.counts_history.last().expect("one interval");
        assert_eq!(last.error, 1);
        assert_eq!(last.total, 1);
        assert_eq!(snapshot.log_buffer.len(), 1);
        assert_eq!(snapshot.log_buffer[0].message, "disk full /dev/sda1");
        assert_eq!(snapshot.lifetime.severity["ERROR"], 1);
        assert!(snapshot.words.iter().any(|w| w.term == "disk"));
    }

    #[test]
    fn severity_totals_hold_in_every_snapshot() {
        let (mut consumer, handle) = consumer();
        for line in [
            "TRACE fine grained",
            "DEBUG details",
            "INFO all good",
            "WARN be careful",
            "ERROR it broke",
            "FATAL gone",
            "no severity at all",
        ] {
            consumer.ingest_line(line);
        }
        consumer.publish_snapshot();
        let snapshot = handle.load();
        assert_eq!(snapshot.severity.total, 7);
        assert_eq!(snapshot.severity.level_sum(), snapshot.severity.total);
    }

    #[test]
    fn filtered_collector_logs_advance_nothing() {
        let (mut consumer, handle) = consumer();
        consumer
            .ingest_line(r#"spans exported {"otelcol.component": "exporter/otlp"}"#);
        consumer.publish_snapshot();
        let snapshot = handle.load();
        assert_eq!(snapshot.ingestion.total_logs_ever, 0);
        assert_eq!(snapshot.severity.total, 0);
        assert!(snapshot.log_buffer.is_empty());
    }

    #[test]
    fn multi_line_json_counts_once() {
        let (mut consumer, handle) = consumer();
        consumer.ingest_line("{");
        consumer.ingest_line("  \"level\": \"warn\",");
        consumer.ingest_line("  \"msg\": \"reassembled\"");
        consumer.ingest_line("}");
        consumer.publish_snapshot();
        let snapshot = handle.load();
        assert_eq!(snapshot.ingestion.total_logs_ever, 1);
        assert_eq!(snapshot.log_buffer[0].severity, Severity::Warn);
        assert_eq!(snapshot.log_buffer[0].message, "reassembled");
    }

    #[test]
    fn otlp_batch_line_counts_per_record() {
        let (mut consumer, handle) = consumer();
        let line = r#"{"resourceLogs":[{"resource":{"attributes":[{"key":"service.name","value":{"stringValue":"svc"}}]},"scopeLogs":[{"logRecords":[{"body":{"stringValue":"a"},"severityNumber":9},{"body":{"stringValue":"b"},"severityNumber":17}]}]}]}"#;
        consumer.ingest_line(line);
        consumer.publish_snapshot();
        let snapshot = handle.load();
        assert_eq!(snapshot.ingestion.total_logs_ever, 2);
        assert_eq!(snapshot.severity.info, 1);
        assert_eq!(snapshot.severity.error, 1);
        assert_eq!(snapshot.lifetime.service["svc"], 2);
    }

    #[test]
    fn tick_resets_interval_but_not_lifetime() {
        let (mut consumer, handle) = consumer();
        consumer.ingest_line("ERROR one");
        consumer.handle_tick();
        consumer.ingest_line("ERROR two");
        consumer.handle_tick();
        let snapshot = handle.load();
        assert_eq!(snapshot.counts_history.len(), 2);
        assert_eq!(snapshot.counts_history[0].error, 1);
        assert_eq!(snapshot.counts_history[1].error, 1);
        // Current interval starts clean after the tick.
        assert_eq!(snapshot.severity.total, 0);
        assert_eq!(snapshot.lifetime.severity["ERROR"], 2);
        assert_eq!(snapshot.ingestion.recent_seconds, vec![1, 1]);
        assert_eq!(snapshot.ingestion.peak_logs_per_sec, 1);
    }

    #[test]
    fn reset_preserves_lifetime_and_buffer() {
        let (mut consumer, handle) = consumer();
        consumer.ingest_line("ERROR disk full on sda1");
        consumer.ingest_line("ERROR disk full on sdb2");
        consumer.handle_control(ControlMsg::Reset);
        let snapshot = handle.load();
        assert!(snapshot.words.is_empty());
        assert!(snapshot.phrases.is_empty());
        assert!(snapshot.patterns_global.is_empty());
        assert_eq!(snapshot.template_stats.total_observations, 0);
        // Untouched by reset:
        assert_eq!(snapshot.log_buffer.len(), 2);
        assert_eq!(snapshot.lifetime.severity["ERROR"], 2);
        assert_eq!(snapshot.ingestion.total_logs_ever, 2);
    }

    #[test]
    fn pause_defers_analysis_and_resume_replays() {
        let (mut consumer, handle) = consumer();
        consumer.handle_control(ControlMsg::Pause);
        consumer.ingest_line("ERROR paused record one");
        consumer.ingest_line("ERROR paused record two");
        consumer.publish_snapshot();
        let during = handle.load();
        assert!(during.paused);
        // Buffer and lifetime advance while paused.
        assert_eq!(during.log_buffer.len(), 2);
        assert_eq!(during.lifetime.severity["ERROR"], 2);
        // Tokenized views wait.
        assert!(during.words.is_empty());
        assert_eq!(during.template_stats.total_observations, 0);

        consumer.handle_control(ControlMsg::Resume);
        let after = handle.load();
        assert!(!after.paused);
        assert!(after.words.iter().any(|w| w.term == "paused"));
        assert_eq!(after.template_stats.total_observations, 2);
    }

    #[test]
    fn resume_replays_more_records_than_the_buffer_holds() {
        let (publisher, handle) = snapshot_slot();
        let config = PipelineConfig {
            log_buffer: 4,
            ..PipelineConfig::default()
        };
        let mut consumer = Consumer::new(&config, None, publisher, 1);
        consumer.handle_control(ControlMsg::Pause);
        for i in 0..10 {
            consumer.ingest_line(&format!("ERROR deferred record number {i}"));
        }
        consumer.handle_control(ControlMsg::Resume);
        let snapshot = handle.load();
        // The buffer keeps only its capacity, but every deferred record
        // reached the analysis stages.
        assert_eq!(snapshot.log_buffer.len(), 4);
        assert_eq!(snapshot.template_stats.total_observations, 10);
        assert_eq!(snapshot.lifetime.word["deferred"], 10);
        assert!(
            snapshot
                .words
                .iter()
                .any(|w| w.term == "deferred" && w.count == 10)
        );
    }

    #[test]
    fn empty_lines_are_skipped_entirely() {
        let (mut consumer, handle) = consumer();
        consumer.ingest_line("");
        consumer.ingest_line("   ");
        consumer.publish_snapshot();
        assert_eq!(handle.load().ingestion.total_logs_ever, 0);
    }
}
