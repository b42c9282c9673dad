// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! The canonical internal log record.

use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The canonical internal form of one log event.
///
/// Created by the normalizer, consumed exactly once by the pipeline
/// consumer, then either retained in the bounded log buffer or dropped.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Wall-clock time at ingestion.
    pub receive_time: DateTime<Utc>,

    /// Timestamp parsed out of the payload, when one was found.
    pub orig_time: Option<DateTime<Utc>>,

    /// Normalized severity.
    pub severity: Severity,

    /// OTLP severity number (1–24), taken from the record when present,
    /// derived from the normalized severity otherwise.
    pub severity_number: i32,

    /// Body text, with tabs replaced by spaces.
    pub message: String,

    /// The verbatim input line.
    pub raw_line: String,

    /// Flattened string attributes. Insertion order is preserved but
    /// carries no semantics.
    pub attributes: Vec<(String, String)>,
}

impl LogRecord {
    /// Looks up the first attribute with the given key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The effective event time: the parsed payload timestamp when
    /// available, the receive time otherwise.
    #[must_use]
    pub fn event_time(&self) -> DateTime<Utc> {
        self.orig_time.unwrap_or(self.receive_time)
    }
}
