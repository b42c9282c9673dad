// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Turning raw lines into canonical [`LogRecord`]s.
//!
//! Normalization never drops a line for being malformed: anything that
//! fails a structured path degrades to the plain-text path. Empty lines
//! are the only input that yields no record at all.

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::logs::v1::LogRecord as OtlpLogRecord;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::detect::{self, LogFormat};
use crate::formatdef::CompiledFormat;
use crate::otlp;
use crate::record::LogRecord;
use crate::severity::Severity;
use crate::timeparse;

/// JSON keys that may carry the event timestamp, in priority order.
const TIMESTAMP_KEYS: [&str; 5] = ["timestamp", "time", "@timestamp", "ts", "date"];

/// JSON keys that may carry the severity, in priority order.
const SEVERITY_KEYS: [&str; 4] = ["level", "severity", "log_level", "loglevel"];

/// JSON keys that may carry the message body, in priority order.
const MESSAGE_KEYS: [&str; 5] = ["message", "msg", "body", "text", "content"];

/// Victoria-mode host synthesis keys, in priority order.
const HOST_KEYS: [&str; 3] = [
    "k8s.node.name",
    "kubernetes.pod_node_name",
    "kubernetes_pod_node_name",
];

static LEADING_SEVERITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\[(]?(TRACE|DEBUG|INFO|WARNING|WARN|ERROR|FATAL|CRITICAL)\b[\])]?[:>\-]?\s*")
        .expect("leading severity regex is valid")
});

static SEVERITY_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(TRACE|DEBUG|INFO|WARNING|WARN|ERROR|FATAL|CRITICAL|PANIC)\b")
        .expect("severity word regex is valid")
});

/// The line normalizer: detection plus field derivation.
///
/// Holds the optional compiled custom format; otherwise stateless, so one
/// instance serves the whole pipeline.
#[derive(Debug, Default)]
pub struct Normalizer {
    custom: Option<CompiledFormat>,
}

impl Normalizer {
    /// A normalizer using only the builtin format detection.
    #[must_use]
    pub fn new() -> Normalizer {
        Normalizer { custom: None }
    }

    /// A normalizer that tries `format` before builtin detection.
    #[must_use]
    pub fn with_format(format: CompiledFormat) -> Normalizer {
        Normalizer {
            custom: Some(format),
        }
    }

    /// Normalizes one logical line at the current wall-clock time.
    #[must_use]
    pub fn normalize(&self, raw_line: &str) -> Vec<LogRecord> {
        self.normalize_at(raw_line, Utc::now())
    }

    /// Normalizes one logical line with an explicit receive time.
    ///
    /// One line can expand to any number of records (OTLP batches, custom
    /// batch formats) including zero (empty line, empty batch).
    #[must_use]
    pub fn normalize_at(&self, raw_line: &str, receive_time: DateTime<Utc>) -> Vec<LogRecord> {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if let Some(custom) = &self.custom {
            if let Some(records) = custom.apply(trimmed, receive_time) {
                return records;
            }
        }
        match detect::detect(trimmed) {
            LogFormat::OtlpBatch(logs_data) => otlp::expand(&logs_data)
                .iter()
                .map(|rec| normalize_otlp_record(rec, trimmed, receive_time))
                .collect(),
            LogFormat::OtlpRecord(value) => match &value {
                Value::Array(items) => items
                    .iter()
                    .flat_map(|item| normalize_otlp_value(item, trimmed, receive_time))
                    .collect(),
                _ => normalize_otlp_value(&value, trimmed, receive_time),
            },
            LogFormat::Json(value) => normalize_json_value(&value, trimmed, receive_time),
            LogFormat::Text | LogFormat::Custom => vec![normalize_text(trimmed, receive_time)],
        }
    }
}

/// Dispatches a non-OTLP JSON document: objects normalize directly
/// (Victoria mode when its markers are present); arrays of objects
/// expand to one record per element; anything else degrades to text.
fn normalize_json_value(
    value: &Value,
    raw_line: &str,
    receive_time: DateTime<Utc>,
) -> Vec<LogRecord> {
    match value {
        Value::Object(map) if is_victoria(map) => {
            vec![normalize_victoria(map, raw_line, receive_time)]
        }
        Value::Object(map) => vec![normalize_json(map, raw_line, receive_time)],
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => items
            .iter()
            .flat_map(|item| normalize_json_value(item, raw_line, receive_time))
            .collect(),
        _ => vec![normalize_text(raw_line, receive_time)],
    }
}

/// Normalizes an OTLP-shaped JSON value that is not a full batch: either a
/// container fragment (`logRecords`, `scopeLogs`) or a single record.
fn normalize_otlp_value(
    value: &Value,
    raw_line: &str,
    receive_time: DateTime<Utc>,
) -> Vec<LogRecord> {
    if value.get("resourceLogs").is_some() {
        // A batch shape that did not pass the strict probe (e.g. zero
        // resourceLogs). Expanding it yields exactly the right number of
        // records, including none.
        return otlp::logs_data_from_json(value)
            .map(|logs_data| {
                otlp::expand(&logs_data)
                    .iter()
                    .map(|rec| normalize_otlp_record(rec, raw_line, receive_time))
                    .collect()
            })
            .unwrap_or_default();
    }
    if let Some(records) = value.get("logRecords").and_then(Value::as_array) {
        return records
            .iter()
            .map(|rec| {
                normalize_otlp_record(&otlp::record_from_json(rec), raw_line, receive_time)
            })
            .collect();
    }
    if let Some(scopes) = value.get("scopeLogs").and_then(Value::as_array) {
        return scopes
            .iter()
            .filter_map(|scope| scope.get("logRecords").and_then(Value::as_array))
            .flatten()
            .map(|rec| {
                normalize_otlp_record(&otlp::record_from_json(rec), raw_line, receive_time)
            })
            .collect();
    }
    vec![normalize_otlp_record(
        &otlp::record_from_json(value),
        raw_line,
        receive_time,
    )]
}

/// Normalizes one raw OTLP record (already expanded).
#[must_use]
pub fn normalize_otlp_record(
    record: &OtlpLogRecord,
    raw_line: &str,
    receive_time: DateTime<Utc>,
) -> LogRecord {
    let orig_time = if record.time_unix_nano != 0 {
        nanos_to_datetime(record.time_unix_nano)
    } else if record.observed_time_unix_nano != 0 {
        nanos_to_datetime(record.observed_time_unix_nano)
    } else {
        None
    };

    let severity = if !record.severity_text.is_empty() {
        Severity::from_text(&record.severity_text)
    } else if (1..=24).contains(&record.severity_number) {
        Severity::from_number(record.severity_number)
    } else {
        Severity::Unknown
    };
    let severity_number = if (1..=24).contains(&record.severity_number) {
        record.severity_number
    } else {
        severity.number()
    };

    let message = record
        .body
        .as_ref()
        .map(otlp::value_to_string)
        .unwrap_or_default()
        .replace('\t', " ");

    let attributes = record
        .attributes
        .iter()
        .map(|kv| {
            let value = kv
                .value
                .as_ref()
                .map(otlp::value_to_string)
                .unwrap_or_default();
            (kv.key.clone(), value)
        })
        .collect();

    LogRecord {
        receive_time,
        orig_time,
        severity,
        severity_number,
        message,
        raw_line: raw_line.to_owned(),
        attributes,
    }
}

fn nanos_to_datetime(nanos: u64) -> Option<DateTime<Utc>> {
    i64::try_from(nanos).ok().map(DateTime::from_timestamp_nanos)
}

fn is_victoria(map: &Map<String, Value>) -> bool {
    map.contains_key("_msg") || (map.contains_key("_stream") && map.contains_key("_time"))
}

fn normalize_json(
    map: &Map<String, Value>,
    raw_line: &str,
    receive_time: DateTime<Utc>,
) -> LogRecord {
    let orig_time = TIMESTAMP_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(timeparse::parse_value);

    let message = MESSAGE_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .map(value_text)
        .next()
        .unwrap_or_else(|| raw_line.to_owned())
        .replace('\t', " ");

    let severity = json_severity(map, &message);

    let mut attributes = Vec::new();
    collect_json_attributes(map, &RESERVED_JSON_KEYS, &mut attributes);

    LogRecord {
        receive_time,
        orig_time,
        severity,
        severity_number: severity.number(),
        message,
        raw_line: raw_line.to_owned(),
        attributes,
    }
}

/// Victoria-style documents: `_msg` carries the body, `_time` the
/// timestamp, and the host attribute is synthesized from node-name keys.
fn normalize_victoria(
    map: &Map<String, Value>,
    raw_line: &str,
    receive_time: DateTime<Utc>,
) -> LogRecord {
    let orig_time = map
        .get("_time")
        .and_then(|v| timeparse::parse_value(v))
        .or_else(|| {
            TIMESTAMP_KEYS
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(timeparse::parse_value)
        });

    let message = map
        .get("_msg")
        .map(value_text)
        .or_else(|| {
            MESSAGE_KEYS
                .iter()
                .filter_map(|key| map.get(*key))
                .map(value_text)
                .next()
        })
        .unwrap_or_else(|| raw_line.to_owned())
        .replace('\t', " ");

    let severity = json_severity(map, &message);

    let mut attributes = Vec::new();
    if let Some(host) = victoria_host(map) {
        attributes.push(("host".to_owned(), host));
    }
    collect_json_attributes(map, &RESERVED_VICTORIA_KEYS, &mut attributes);

    LogRecord {
        receive_time,
        orig_time,
        severity,
        severity_number: severity.number(),
        message,
        raw_line: raw_line.to_owned(),
        attributes,
    }
}

fn victoria_host(map: &Map<String, Value>) -> Option<String> {
    let stream = map.get("_stream");
    let stream_object = stream.and_then(Value::as_object);
    let stream_text = stream.and_then(Value::as_str);
    for key in HOST_KEYS {
        if let Some(value) = map.get(key) {
            return Some(value_text(value));
        }
        if let Some(value) = stream_object.and_then(|s| s.get(key)) {
            return Some(value_text(value));
        }
        if let Some(value) = stream_text.and_then(|s| stream_label(s, key)) {
            return Some(value);
        }
    }
    None
}

/// Extracts one label value out of a Victoria `_stream` selector string,
/// e.g. `{k8s.node.name="node-7",namespace="default"}`.
fn stream_label(stream: &str, key: &str) -> Option<String> {
    let pattern = format!("{key}=\"");
    let start = stream.find(&pattern)? + pattern.len();
    let rest = &stream[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_owned())
}

const RESERVED_JSON_KEYS: [&str; 15] = [
    "timestamp",
    "time",
    "@timestamp",
    "ts",
    "date",
    "level",
    "severity",
    "log_level",
    "loglevel",
    "message",
    "msg",
    "body",
    "text",
    "content",
    "attributes",
];

const RESERVED_VICTORIA_KEYS: [&str; 19] = [
    "timestamp",
    "time",
    "@timestamp",
    "ts",
    "date",
    "level",
    "severity",
    "log_level",
    "loglevel",
    "message",
    "msg",
    "body",
    "text",
    "content",
    "attributes",
    "_msg",
    "_time",
    "_stream",
    "_stream_id",
];

/// Merges the nested `attributes` object with top-level non-reserved keys.
fn collect_json_attributes(
    map: &Map<String, Value>,
    reserved: &[&str],
    out: &mut Vec<(String, String)>,
) {
    if let Some(nested) = map.get("attributes").and_then(Value::as_object) {
        for (key, value) in nested {
            out.push((key.clone(), value_text(value)));
        }
    }
    for (key, value) in map {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        if out.iter().any(|(k, _)| k == key) {
            continue;
        }
        out.push((key.clone(), value_text(value)));
    }
}

/// Renders a JSON value as attribute/body text: scalars bare, compound
/// values as their JSON encoding.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_severity(map: &Map<String, Value>, message: &str) -> Severity {
    for key in SEVERITY_KEYS {
        if let Some(value) = map.get(key) {
            return Severity::from_text(&value_text(value));
        }
    }
    message_severity(message).unwrap_or(Severity::Info)
}

fn message_severity(message: &str) -> Option<Severity> {
    SEVERITY_WORD_RE
        .find(message)
        .map(|m| Severity::from_text(m.as_str()))
}

/// Strips one leading severity token (`ERROR:`, `[WARN]`, `INFO>` …) off
/// the front of a message, returning the rest.
#[must_use]
pub fn strip_leading_severity(message: &str) -> &str {
    match LEADING_SEVERITY_RE.find(message) {
        Some(m) => message[m.end()..].trim_start(),
        None => message,
    }
}

fn normalize_text(line: &str, receive_time: DateTime<Utc>) -> LogRecord {
    let (orig_time, remaining) = match timeparse::parse_from_text(line) {
        Some((ts, rest)) => (Some(ts), rest),
        None => (None, line.to_owned()),
    };

    let (severity, message) = match LEADING_SEVERITY_RE.find(&remaining) {
        Some(m) => {
            let severity = Severity::from_text(
                LEADING_SEVERITY_RE
                    .captures(&remaining)
                    .and_then(|caps| caps.get(1))
                    .map(|g| g.as_str())
                    .unwrap_or_default(),
            );
            (severity, remaining[m.end()..].trim_start().to_owned())
        }
        None => (
            message_severity(&remaining).unwrap_or(Severity::Info),
            remaining.clone(),
        ),
    };

    LogRecord {
        receive_time,
        orig_time,
        severity,
        severity_number: severity.number(),
        message: message.replace('\t', " "),
        raw_line: line.to_owned(),
        attributes: Vec::new(),
    }
}
