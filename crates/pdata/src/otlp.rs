// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! OTLP `LogsData` expansion and the canonical single-record JSON form.
//!
//! The expander flattens the resource → scope → record nesting into one
//! record per leaf, merging resource attributes underneath record
//! attributes (record wins on key collision). It never re-normalizes
//! timestamps or severities: its outputs are raw OTLP records that still
//! traverse the normalizer.
//!
//! The JSON codecs here are hand-driven over `serde_json::Value` so both
//! stringified and numeric `uint64` fields are accepted on input while the
//! canonical output always follows the wire contract (stringified
//! `timeUnixNano`, lowercase-hex ids, `body` wrapper objects).

use opentelemetry_proto::tonic::common::v1::any_value::Value as AnyValueEnum;
use opentelemetry_proto::tonic::common::v1::{AnyValue, ArrayValue, KeyValue, KeyValueList};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, LogsData, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::resource::v1::Resource;
use serde_json::{Map, Value};

/// Flattens an OTLP batch into one record per leaf `LogRecord`, in
/// document order, each enriched with its ancestor resource attributes.
/// Empty nested arrays yield zero outputs.
#[must_use]
pub fn expand(logs_data: &LogsData) -> Vec<LogRecord> {
    let mut out = Vec::new();
    for resource_logs in &logs_data.resource_logs {
        let resource_attrs = resource_logs
            .resource
            .as_ref()
            .map(|r| r.attributes.as_slice())
            .unwrap_or_default();
        for scope_logs in &resource_logs.scope_logs {
            for record in &scope_logs.log_records {
                let mut merged = record.clone();
                merged.attributes = merge_attributes(resource_attrs, &record.attributes);
                out.push(merged);
            }
        }
    }
    out
}

/// Resource attributes first (minus the ones the record overrides), then
/// the record's own attributes.
fn merge_attributes(resource: &[KeyValue], record: &[KeyValue]) -> Vec<KeyValue> {
    let mut merged: Vec<KeyValue> = resource
        .iter()
        .filter(|kv| !record.iter().any(|r| r.key == kv.key))
        .cloned()
        .collect();
    merged.extend(record.iter().cloned());
    merged
}

/// Decodes an OTLP `LogsData` out of a JSON document. Accepts both
/// stringified and numeric `uint64` fields. Returns `None` when the
/// document does not have the `resourceLogs` shape.
#[must_use]
pub fn logs_data_from_json(value: &Value) -> Option<LogsData> {
    let resource_logs = value.get("resourceLogs")?.as_array()?;
    let resource_logs = resource_logs
        .iter()
        .filter_map(resource_logs_from_json)
        .collect();
    Some(LogsData { resource_logs })
}

fn resource_logs_from_json(value: &Value) -> Option<ResourceLogs> {
    let resource = value.get("resource").map(|r| Resource {
        attributes: key_values_from_json(r.get("attributes")),
        ..Default::default()
    });
    let scope_logs = value
        .get("scopeLogs")
        .and_then(Value::as_array)
        .map(|scopes| {
            scopes
                .iter()
                .map(|s| ScopeLogs {
                    log_records: s
                        .get("logRecords")
                        .and_then(Value::as_array)
                        .map(|records| records.iter().map(record_from_json).collect())
                        .unwrap_or_default(),
                    ..Default::default()
                })
                .collect()
        })
        .unwrap_or_default();
    Some(ResourceLogs {
        resource,
        scope_logs,
        ..Default::default()
    })
}

/// Decodes a single OTLP-shaped record object (the canonical JSON form).
#[must_use]
pub fn record_from_json(value: &Value) -> LogRecord {
    LogRecord {
        time_unix_nano: u64_field(value, "timeUnixNano"),
        observed_time_unix_nano: u64_field(value, "observedTimeUnixNano"),
        severity_number: value
            .get("severityNumber")
            .and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            })
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(0),
        severity_text: value
            .get("severityText")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        body: value.get("body").and_then(any_value_from_json),
        attributes: key_values_from_json(value.get("attributes")),
        trace_id: hex_field(value, "traceId"),
        span_id: hex_field(value, "spanId"),
        ..Default::default()
    }
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0)
}

fn hex_field(value: &Value, key: &str) -> Vec<u8> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| hex_decode(s))
        .unwrap_or_default()
}

/// Decodes an OTLP attribute list (`[{key, value: {...}}]`).
#[must_use]
pub fn key_values_from_json(value: Option<&Value>) -> Vec<KeyValue> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let key = item.get("key")?.as_str()?.to_owned();
                    let value = item.get("value").and_then(any_value_from_json);
                    Some(KeyValue { key, value })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes an OTLP `AnyValue` wrapper object.
#[must_use]
pub fn any_value_from_json(value: &Value) -> Option<AnyValue> {
    let obj = value.as_object()?;
    let inner = if let Some(s) = obj.get("stringValue").and_then(Value::as_str) {
        AnyValueEnum::StringValue(s.to_owned())
    } else if let Some(b) = obj.get("boolValue").and_then(Value::as_bool) {
        AnyValueEnum::BoolValue(b)
    } else if let Some(i) = obj.get("intValue").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    }) {
        AnyValueEnum::IntValue(i)
    } else if let Some(d) = obj.get("doubleValue").and_then(Value::as_f64) {
        AnyValueEnum::DoubleValue(d)
    } else if let Some(items) = obj
        .get("arrayValue")
        .and_then(|v| v.get("values"))
        .and_then(Value::as_array)
    {
        AnyValueEnum::ArrayValue(ArrayValue {
            values: items.iter().filter_map(any_value_from_json).collect(),
        })
    } else if let Some(entries) = obj
        .get("kvlistValue")
        .and_then(|v| v.get("values"))
        .and_then(Value::as_array)
    {
        AnyValueEnum::KvlistValue(KeyValueList {
            values: entries
                .iter()
                .filter_map(|item| {
                    let key = item.get("key")?.as_str()?.to_owned();
                    let value = item.get("value").and_then(any_value_from_json);
                    Some(KeyValue { key, value })
                })
                .collect(),
        })
    } else {
        return None;
    };
    Some(AnyValue { value: Some(inner) })
}

/// Encodes one expanded record as the canonical single-record JSON line
/// the OTLP receiver forwards internally. Sentinel keys are preserved so
/// the line re-detects as OTLP downstream.
#[must_use]
pub fn to_canonical_json(record: &LogRecord) -> String {
    let mut obj = Map::new();
    if record.time_unix_nano != 0 {
        let _ = obj.insert(
            "timeUnixNano".to_owned(),
            Value::String(record.time_unix_nano.to_string()),
        );
    }
    if record.observed_time_unix_nano != 0 {
        let _ = obj.insert(
            "observedTimeUnixNano".to_owned(),
            Value::String(record.observed_time_unix_nano.to_string()),
        );
    }
    if !record.severity_text.is_empty() {
        let _ = obj.insert(
            "severityText".to_owned(),
            Value::String(record.severity_text.clone()),
        );
    }
    if record.severity_number != 0 {
        let _ = obj.insert(
            "severityNumber".to_owned(),
            Value::Number(record.severity_number.into()),
        );
    }
    if let Some(body) = &record.body {
        let _ = obj.insert("body".to_owned(), any_value_to_json(body));
    }
    if !record.attributes.is_empty() {
        let attrs: Vec<Value> = record
            .attributes
            .iter()
            .map(|kv| {
                let mut entry = Map::new();
                let _ = entry.insert("key".to_owned(), Value::String(kv.key.clone()));
                if let Some(value) = &kv.value {
                    let _ = entry.insert("value".to_owned(), any_value_to_json(value));
                }
                Value::Object(entry)
            })
            .collect();
        let _ = obj.insert("attributes".to_owned(), Value::Array(attrs));
    }
    if !record.trace_id.is_empty() {
        let _ = obj.insert("traceId".to_owned(), Value::String(hex_encode(&record.trace_id)));
    }
    if !record.span_id.is_empty() {
        let _ = obj.insert("spanId".to_owned(), Value::String(hex_encode(&record.span_id)));
    }
    Value::Object(obj).to_string()
}

/// Encodes an `AnyValue` as its OTLP/JSON wrapper object.
#[must_use]
pub fn any_value_to_json(value: &AnyValue) -> Value {
    let mut obj = Map::new();
    match &value.value {
        Some(AnyValueEnum::StringValue(s)) => {
            let _ = obj.insert("stringValue".to_owned(), Value::String(s.clone()));
        }
        Some(AnyValueEnum::BoolValue(b)) => {
            let _ = obj.insert("boolValue".to_owned(), Value::Bool(*b));
        }
        Some(AnyValueEnum::IntValue(i)) => {
            let _ = obj.insert("intValue".to_owned(), Value::String(i.to_string()));
        }
        Some(AnyValueEnum::DoubleValue(d)) => {
            let number = serde_json::Number::from_f64(*d)
                .unwrap_or_else(|| serde_json::Number::from(0));
            let _ = obj.insert("doubleValue".to_owned(), Value::Number(number));
        }
        Some(AnyValueEnum::ArrayValue(items)) => {
            let mut inner = Map::new();
            let _ = inner.insert(
                "values".to_owned(),
                Value::Array(items.values.iter().map(any_value_to_json).collect()),
            );
            let _ = obj.insert("arrayValue".to_owned(), Value::Object(inner));
        }
        Some(AnyValueEnum::KvlistValue(entries)) => {
            let mut values = Vec::new();
            for kv in &entries.values {
                let mut entry = Map::new();
                let _ = entry.insert("key".to_owned(), Value::String(kv.key.clone()));
                if let Some(v) = &kv.value {
                    let _ = entry.insert("value".to_owned(), any_value_to_json(v));
                }
                values.push(Value::Object(entry));
            }
            let mut inner = Map::new();
            let _ = inner.insert("values".to_owned(), Value::Array(values));
            let _ = obj.insert("kvlistValue".to_owned(), Value::Object(inner));
        }
        Some(AnyValueEnum::BytesValue(bytes)) => {
            let _ = obj.insert("bytesValue".to_owned(), Value::String(hex_encode(bytes)));
        }
        None => {}
    }
    Value::Object(obj)
}

/// Coerces an `AnyValue` body to display text. Scalars render bare;
/// compound values render as their JSON wrapper.
#[must_use]
pub fn value_to_string(value: &AnyValue) -> String {
    match &value.value {
        Some(AnyValueEnum::StringValue(s)) => s.clone(),
        Some(AnyValueEnum::BoolValue(b)) => b.to_string(),
        Some(AnyValueEnum::IntValue(i)) => i.to_string(),
        Some(AnyValueEnum::DoubleValue(d)) => d.to_string(),
        Some(AnyValueEnum::BytesValue(bytes)) => hex_encode(bytes),
        Some(_) => any_value_to_json(value).to_string(),
        None => String::new(),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
