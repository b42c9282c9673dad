// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Timestamp extraction from free text, values and numeric epochs.
//!
//! A single composite regex recognizes the timestamp shapes seen in the
//! wild (ISO-8601 with dot or comma fractions and optional zone offset,
//! syslog `Mon DD HH:MM:SS`, bracketed variants, bare time-of-day). The
//! matched span is then tried against an ordered list of concrete layouts,
//! RFC3339 variants first. Failure is not an error: callers substitute the
//! receive time.

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?:
            \[\d{4}-\d{2}-\d{2}[T\ ]\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?(?:Z|[+-]\d{2}:?\d{2})?\]
          | \d{4}-\d{2}-\d{2}[T\ ]\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?(?:Z|[+-]\d{2}:?\d{2})?
          | \d{4}/\d{2}/\d{2}\ \d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?
          | \[?\d{2}/[A-Z][a-z]{2}/\d{4}:\d{2}:\d{2}:\d{2}(?:\ [+-]\d{4})?\]?
          | [A-Z][a-z]{2},\ \d{1,2}\ [A-Z][a-z]{2}\ \d{4}\ \d{2}:\d{2}:\d{2}(?:\ [+-]\d{4})?
          | [A-Z][a-z]{2}\ +\d{1,2}\ \d{2}:\d{2}:\d{2}(?:\.\d{1,6})?
          | \[\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?\]
          | \d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?
        )",
    )
    .expect("timestamp regex is valid")
});

/// Extracts the first recognizable timestamp from `text`.
///
/// On success returns the parsed timestamp and the input with the matched
/// span removed (whitespace around the cut collapsed). Returns `None` when
/// no span both matches the composite regex and parses under one of the
/// known layouts.
#[must_use]
pub fn parse_from_text(text: &str) -> Option<(DateTime<Utc>, String)> {
    for m in TIMESTAMP_RE.find_iter(text) {
        if let Some(ts) = parse_candidate(m.as_str()) {
            let mut remaining = String::with_capacity(text.len() - m.len());
            remaining.push_str(&text[..m.start()]);
            remaining.push_str(&text[m.end()..]);
            return Some((ts, remaining.trim().to_owned()));
        }
    }
    None
}

/// Parses a timestamp out of a JSON value: strings are tried against the
/// known layouts (and digit strings as numeric epochs); numbers are
/// interpreted as epochs with the scale decided by magnitude.
#[must_use]
pub fn parse_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed.chars().all(|c| c.is_ascii_digit()) {
                return trimmed.parse::<i64>().ok().and_then(from_epoch);
            }
            if let Ok(f) = trimmed.parse::<f64>() {
                return from_epoch_f64(f);
            }
            parse_candidate(trimmed).or_else(|| parse_from_text(trimmed).map(|(ts, _)| ts))
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                from_epoch(i)
            } else {
                n.as_f64().and_then(from_epoch_f64)
            }
        }
        _ => None,
    }
}

/// Converts an integer epoch to a timestamp, deciding the scale
/// (seconds / milliseconds / microseconds / nanoseconds) by magnitude.
#[must_use]
pub fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    // Each bound sits between two adjacent scales of the present-day epoch,
    // so every canonical scale classifies onto itself.
    let nanos: i128 = if value > 100_000_000_000_000_000 {
        i128::from(value)
    } else if value > 100_000_000_000_000 {
        i128::from(value) * 1_000
    } else if value > 100_000_000_000 {
        i128::from(value) * 1_000_000
    } else {
        i128::from(value) * 1_000_000_000
    };
    let secs = i64::try_from(nanos / 1_000_000_000).ok()?;
    let subsec = u32::try_from(nanos % 1_000_000_000).ok()?;
    DateTime::from_timestamp(secs, subsec)
}

fn from_epoch_f64(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    if value.fract() == 0.0 && value < 9e18 {
        return from_epoch(value as i64);
    }
    // Fractional values are sub-second precision on a seconds epoch.
    let secs = value.trunc() as i64;
    let subsec = (value.fract() * 1e9) as u32;
    DateTime::from_timestamp(secs, subsec.min(999_999_999))
}

/// Attempts the ordered layout list against one candidate span.
fn parse_candidate(candidate: &str) -> Option<DateTime<Utc>> {
    let bare = candidate
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(candidate);
    // Comma-to-dot normalization: every fractional layout below expects a
    // decimal point.
    let dotted = if bare.contains(',') {
        bare.replace(',', ".")
    } else {
        bare.to_owned()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&dotted) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&dotted, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&dotted, "%Y-%m-%d %H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&dotted, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&dotted, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&dotted, "%Y/%m/%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    // Common Log Format, with and without the offset.
    if let Ok(dt) = DateTime::parse_from_str(&dotted, "%d/%b/%Y:%H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&dotted, "%d/%b/%Y:%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    // RFC 1123 style.
    if let Ok(dt) = DateTime::parse_from_str(&dotted, "%a, %d %b %Y %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&dotted, "%a, %d %b %Y %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    // Syslog layout carries no year; assume the current one.
    let with_year = format!("{} {}", Utc::now().year(), dotted);
    if let Ok(naive) = NaiveDateTime::parse_from_str(&with_year, "%Y %b %e %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(time) = NaiveTime::parse_from_str(&dotted, "%H:%M:%S%.f") {
        let today = Utc::now().date_naive();
        return Some(Utc.from_utc_datetime(&today.and_time(time)));
    }
    None
}
