// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Severity, host and service bookkeeping: per-interval counts, the
//! per-minute heatmap ring, the tick history, and the monotonic lifetime
//! counters.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use tailscope_pdata::record::LogRecord;
use tailscope_pdata::severity::Severity;

/// Hours of heatmap history retained in memory.
const HEATMAP_RETAIN_HOURS: i64 = 6;

/// Minutes of heatmap history exposed to display queries.
const HEATMAP_DISPLAY_MINUTES: i64 = 60;

/// Completed tick intervals retained in [`CountsHistory`].
const COUNTS_HISTORY_CAP: usize = 50;

/// Services retained per severity in the service histograms.
const SERVICES_PER_SEVERITY: usize = 10;

/// Maximum length of a `key=value` pair admitted to lifetime counters.
const MAX_KEY_VALUE_LEN: usize = 200;

/// Non-negative counters for one aggregation window.
///
/// `total` always equals the sum of the individual counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    /// TRACE records.
    pub trace: u64,
    /// DEBUG records.
    pub debug: u64,
    /// INFO records.
    pub info: u64,
    /// WARN records.
    pub warn: u64,
    /// ERROR records.
    pub error: u64,
    /// FATAL records.
    pub fatal: u64,
    /// Reserved for inputs kept distinct from FATAL by callers; the
    /// normalizer itself folds CRITICAL into FATAL.
    pub critical: u64,
    /// Records without any severity signal.
    pub unknown: u64,
    /// Sum of all the above.
    pub total: u64,
}

impl SeverityCounts {
    /// Counts one record of the given severity.
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Trace => self.trace += 1,
            Severity::Debug => self.debug += 1,
            Severity::Info => self.info += 1,
            Severity::Warn => self.warn += 1,
            Severity::Error => self.error += 1,
            Severity::Fatal => self.fatal += 1,
            Severity::Unknown => self.unknown += 1,
        }
        self.total += 1;
    }

    /// Sum of the individual level counters; equals `total` by invariant.
    #[must_use]
    pub fn level_sum(&self) -> u64 {
        self.trace
            + self.debug
            + self.info
            + self.warn
            + self.error
            + self.fatal
            + self.critical
            + self.unknown
    }
}

/// One minute bucket of the activity heatmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeatmapMinute {
    /// Bucket start, truncated to the minute.
    pub timestamp: DateTime<Utc>,
    /// Severity counts within the minute.
    pub counts: SeverityCounts,
}

/// Time-ordered ring of per-minute severity buckets. Six hours are
/// retained; display queries filter to the last sixty minutes.
#[derive(Debug, Default)]
pub struct Heatmap {
    minutes: VecDeque<HeatmapMinute>,
}

impl Heatmap {
    /// Counts one record in its minute bucket.
    pub fn record(&mut self, severity: Severity, at: DateTime<Utc>) {
        let minute = truncate_to_minute(at);
        match self.minutes.back_mut() {
            Some(bucket) if bucket.timestamp == minute => bucket.counts.add(severity),
            _ => {
                let mut counts = SeverityCounts::default();
                counts.add(severity);
                self.minutes.push_back(HeatmapMinute {
                    timestamp: minute,
                    counts,
                });
            }
        }
        let horizon = minute - Duration::hours(HEATMAP_RETAIN_HOURS);
        while self
            .minutes
            .front()
            .is_some_and(|bucket| bucket.timestamp < horizon)
        {
            let _ = self.minutes.pop_front();
        }
    }

    /// The buckets within the sixty-minute display window ending at `now`.
    #[must_use]
    pub fn display_window(&self, now: DateTime<Utc>) -> Vec<HeatmapMinute> {
        let horizon = truncate_to_minute(now) - Duration::minutes(HEATMAP_DISPLAY_MINUTES);
        self.minutes
            .iter()
            .filter(|bucket| bucket.timestamp >= horizon)
            .cloned()
            .collect()
    }

    /// Number of retained buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.minutes.len()
    }

    /// True when no bucket is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty()
    }
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// FIFO of completed tick intervals, capacity 50.
#[derive(Debug, Default)]
pub struct CountsHistory {
    entries: VecDeque<SeverityCounts>,
}

impl CountsHistory {
    /// Appends one completed interval, evicting the oldest beyond
    /// capacity.
    pub fn push(&mut self, counts: SeverityCounts) {
        self.entries.push_back(counts);
        while self.entries.len() > COUNTS_HISTORY_CAP {
            let _ = self.entries.pop_front();
        }
    }

    /// The retained intervals, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<SeverityCounts> {
        self.entries.iter().copied().collect()
    }

    /// The most recent completed interval.
    #[must_use]
    pub fn last(&self) -> Option<SeverityCounts> {
        self.entries.back().copied()
    }

    /// Number of retained intervals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no interval has completed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deep-copyable view of the lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifetimeSnapshot {
    /// Records per normalized severity token.
    pub severity: BTreeMap<String, u64>,
    /// Records per `host` attribute value.
    pub host: BTreeMap<String, u64>,
    /// Records per service (`service.name`, falling back to `service`).
    pub service: BTreeMap<String, u64>,
    /// Records per `key=value` attribute pair.
    pub key_value: BTreeMap<String, u64>,
    /// Occurrences per message word.
    pub word: BTreeMap<String, u64>,
    /// Per-attribute-key value histograms.
    pub attribute_values: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Monotonic counters covering the whole process lifetime. Never pruned,
/// never reset; only the per-key value histograms are capped to bound
/// worst-case cardinality.
#[derive(Debug)]
pub struct LifetimeCounters {
    snapshot: LifetimeSnapshot,
    max_attribute_values: usize,
}

impl LifetimeCounters {
    /// Creates empty counters with the given per-key histogram cap.
    #[must_use]
    pub fn new(max_attribute_values: usize) -> LifetimeCounters {
        LifetimeCounters {
            snapshot: LifetimeSnapshot::default(),
            max_attribute_values,
        }
    }

    /// Applies one record (with its tokenized words) to every lifetime
    /// view.
    pub fn record(&mut self, record: &LogRecord, words: &[String]) {
        self.record_structure(record);
        self.record_words(words);
    }

    /// The structural views: severity, host, service, `key=value` pairs
    /// and attribute value histograms. Advances even while analysis is
    /// paused.
    pub fn record_structure(&mut self, record: &LogRecord) {
        *self
            .snapshot
            .severity
            .entry(record.severity.as_str().to_owned())
            .or_insert(0) += 1;

        if let Some(host) = record.attribute("host") {
            *self.snapshot.host.entry(host.to_owned()).or_insert(0) += 1;
        }
        if let Some(service) = record
            .attribute("service.name")
            .or_else(|| record.attribute("service"))
        {
            *self.snapshot.service.entry(service.to_owned()).or_insert(0) += 1;
        }

        for (key, value) in &record.attributes {
            let pair = format!("{key}={value}");
            if pair.len() < MAX_KEY_VALUE_LEN {
                *self.snapshot.key_value.entry(pair).or_insert(0) += 1;
            }
            let histogram = self
                .snapshot
                .attribute_values
                .entry(key.clone())
                .or_default();
            if let Some(count) = histogram.get_mut(value) {
                *count += 1;
            } else if histogram.len() < self.max_attribute_values {
                let _ = histogram.insert(value.clone(), 1);
            }
            // Histogram at capacity: novel values are not tracked.
        }
    }

    /// The per-word view; words come from the tokenizer, so this part is
    /// deferred while analysis is paused.
    pub fn record_words(&mut self, words: &[String]) {
        for word in words {
            *self.snapshot.word.entry(word.clone()).or_insert(0) += 1;
        }
    }

    /// A deep copy of every lifetime view.
    #[must_use]
    pub fn snapshot(&self) -> LifetimeSnapshot {
        self.snapshot.clone()
    }
}

/// Per-severity service histograms, top-10 by count retained.
#[derive(Debug, Default)]
pub struct ServiceHistograms {
    by_severity: BTreeMap<Severity, BTreeMap<String, u64>>,
}

impl ServiceHistograms {
    /// Counts one record's service under its severity.
    pub fn record(&mut self, severity: Severity, record: &LogRecord) {
        let Some(service) = record
            .attribute("service.name")
            .or_else(|| record.attribute("service"))
        else {
            return;
        };
        let histogram = self.by_severity.entry(severity).or_default();
        *histogram.entry(service.to_owned()).or_insert(0) += 1;
    }

    /// Deep copy keyed by severity token, trimmed to the top ten services
    /// per severity by (count desc, name asc).
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        self.by_severity
            .iter()
            .map(|(severity, histogram)| {
                let mut ranked: Vec<(String, u64)> =
                    histogram.iter().map(|(k, v)| (k.clone(), *v)).collect();
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                ranked.truncate(SERVICES_PER_SEVERITY);
                (
                    severity.as_str().to_owned(),
                    ranked.into_iter().collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record_with(severity: Severity, attrs: Vec<(String, String)>) -> LogRecord {
        LogRecord {
            receive_time: Utc::now(),
            orig_time: None,
            severity,
            severity_number: severity.number(),
            message: "m".to_owned(),
            raw_line: "m".to_owned(),
            attributes: attrs,
        }
    }

    #[test]
    fn severity_counts_total_invariant() {
        let mut counts = SeverityCounts::default();
        for severity in tailscope_pdata::severity::ALL_SEVERITIES {
            counts.add(severity);
        }
        counts.add(Severity::Error);
        assert_eq!(counts.total, 8);
        assert_eq!(counts.level_sum(), counts.total);
        assert_eq!(counts.error, 2);
    }

    #[test]
    fn heatmap_buckets_by_minute() {
        let mut heatmap = Heatmap::default();
        let base = Utc::now();
        heatmap.record(Severity::Info, base);
        heatmap.record(Severity::Error, base + Duration::seconds(1));
        heatmap.record(Severity::Info, base + Duration::minutes(2));
        // Same minute twice, then a later minute.
        assert!(heatmap.len() >= 2);
        let window = heatmap.display_window(base + Duration::minutes(2));
        let total: u64 = window.iter().map(|b| b.counts.total).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn heatmap_display_filters_to_sixty_minutes() {
        let mut heatmap = Heatmap::default();
        let now = Utc::now();
        heatmap.record(Severity::Info, now - Duration::hours(3));
        heatmap.record(Severity::Info, now - Duration::minutes(30));
        heatmap.record(Severity::Info, now);
        // Three hours back is retained but not displayed.
        assert_eq!(heatmap.len(), 3);
        assert_eq!(heatmap.display_window(now).len(), 2);
    }

    #[test]
    fn heatmap_retention_is_six_hours() {
        let mut heatmap = Heatmap::default();
        let now = Utc::now();
        heatmap.record(Severity::Info, now - Duration::hours(7));
        heatmap.record(Severity::Info, now);
        assert_eq!(heatmap.len(), 1);
    }

    #[test]
    fn counts_history_evicts_fifo() {
        let mut history = CountsHistory::default();
        for i in 0..60u64 {
            let mut counts = SeverityCounts::default();
            counts.info = i;
            counts.total = i;
            history.push(counts);
        }
        assert_eq!(history.len(), 50);
        let entries = history.entries();
        assert_eq!(entries[0].info, 10);
        assert_eq!(history.last().expect("non-empty").info, 59);
    }

    #[test]
    fn lifetime_counters_accumulate() {
        let mut lifetime = LifetimeCounters::new(100);
        let record = record_with(
            Severity::Error,
            vec![
                ("host".to_owned(), "web-1".to_owned()),
                ("service.name".to_owned(), "checkout".to_owned()),
            ],
        );
        lifetime.record(&record, &["disk".to_owned(), "full".to_owned()]);
        lifetime.record(&record, &["disk".to_owned()]);
        let snapshot = lifetime.snapshot();
        assert_eq!(snapshot.severity["ERROR"], 2);
        assert_eq!(snapshot.host["web-1"], 2);
        assert_eq!(snapshot.service["checkout"], 2);
        assert_eq!(snapshot.key_value["host=web-1"], 2);
        assert_eq!(snapshot.word["disk"], 2);
        assert_eq!(snapshot.word["full"], 1);
        assert_eq!(snapshot.attribute_values["host"]["web-1"], 2);
    }

    #[test]
    fn oversized_key_value_pairs_skipped() {
        let mut lifetime = LifetimeCounters::new(100);
        let record = record_with(
            Severity::Info,
            vec![("payload".to_owned(), "x".repeat(300))],
        );
        lifetime.record(&record, &[]);
        let snapshot = lifetime.snapshot();
        assert!(snapshot.key_value.is_empty());
        // The value histogram still tracks it.
        assert_eq!(snapshot.attribute_values["payload"].len(), 1);
    }

    #[test]
    fn attribute_value_histogram_capped() {
        let mut lifetime = LifetimeCounters::new(2);
        for value in ["a", "b", "c"] {
            let record = record_with(
                Severity::Info,
                vec![("shard".to_owned(), value.to_owned())],
            );
            lifetime.record(&record, &[]);
        }
        let snapshot = lifetime.snapshot();
        assert_eq!(snapshot.attribute_values["shard"].len(), 2);
        // The pair counter keeps counting regardless.
        assert_eq!(snapshot.key_value.len(), 3);
    }

    #[test]
    fn service_histograms_keep_top_ten() {
        let mut histograms = ServiceHistograms::default();
        for i in 0..12u64 {
            let service = format!("svc-{i:02}");
            // svc-00 seen once, svc-01 twice, ... svc-11 twelve times.
            for _ in 0..=i {
                let record = record_with(
                    Severity::Error,
                    vec![("service.name".to_owned(), service.clone())],
                );
                histograms.record(Severity::Error, &record);
            }
        }
        let snapshot = histograms.snapshot();
        let errors = &snapshot["ERROR"];
        assert_eq!(errors.len(), 10);
        assert!(errors.contains_key("svc-11"));
        assert!(!errors.contains_key("svc-00"));
    }
}
