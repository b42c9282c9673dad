// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-line format classification.
//!
//! Dispatch is a tagged enum, not trait objects: each variant carries the
//! minimum payload the next stage needs, so nothing downstream has to
//! re-probe the line.

use opentelemetry_proto::tonic::logs::v1::LogsData;
use serde_json::Value;

use crate::otlp;

/// Keys whose presence anywhere in a JSON document marks it as
/// OTLP-shaped.
const OTLP_SENTINEL_KEYS: [&str; 7] = [
    "timeUnixNano",
    "observedTimeUnixNano",
    "severityNumber",
    "severityText",
    "resourceLogs",
    "scopeLogs",
    "logRecords",
];

/// The detected format of one logical input line.
#[derive(Debug, Clone)]
pub enum LogFormat {
    /// A full OTLP `LogsData` batch (resource → scope → record nesting).
    OtlpBatch(Box<LogsData>),
    /// A single OTLP-shaped log record object (the canonical JSON form the
    /// receiver forwards internally).
    OtlpRecord(Value),
    /// A JSON object without OTLP markers.
    Json(Value),
    /// Anything that is not JSON.
    Text,
    /// A line claimed by a user-declared custom format definition.
    ///
    /// Never produced by [`detect`]; the normalizer emits it when a
    /// compiled definition matches the line.
    Custom,
}

/// Classifies one trimmed, non-empty line.
#[must_use]
pub fn detect(line: &str) -> LogFormat {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return LogFormat::Text;
    };
    if !value.is_object() && !value.is_array() {
        // Bare JSON scalars carry no structure worth dissecting.
        return LogFormat::Text;
    }
    if contains_otlp_sentinel(&value) {
        if let Some(logs_data) = otlp::logs_data_from_json(&value) {
            if !logs_data.resource_logs.is_empty() {
                return LogFormat::OtlpBatch(Box::new(logs_data));
            }
        }
        return LogFormat::OtlpRecord(value);
    }
    LogFormat::Json(value)
}

/// Recursively scans a JSON document for any OTLP sentinel key.
fn contains_otlp_sentinel(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            if map.keys().any(|k| OTLP_SENTINEL_KEYS.contains(&k.as_str())) {
                return true;
            }
            map.values().any(contains_otlp_sentinel)
        }
        Value::Array(items) => items.iter().any(contains_otlp_sentinel),
        _ => false,
    }
}
