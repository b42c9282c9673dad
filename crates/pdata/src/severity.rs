// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Normalized severity levels and their OTLP number mapping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized log severity.
///
/// Whatever the input format calls its level, normalization collapses it
/// into one of these seven tokens. `Unknown` is reserved for records that
/// carry no severity signal at all; unrecognized *text* collapses to `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Finest-grained diagnostic events.
    Trace,
    /// Debugging events.
    Debug,
    /// Routine operational events.
    Info,
    /// Events that may require attention.
    Warn,
    /// Errors that did not stop the emitting component.
    Error,
    /// Errors after which the emitting component cannot continue.
    Fatal,
    /// No severity signal present on the record.
    Unknown,
}

/// All normalized severities, in ascending order of seriousness with
/// `Unknown` last. Useful for iterating per-severity shards.
pub const ALL_SEVERITIES: [Severity; 7] = [
    Severity::Trace,
    Severity::Debug,
    Severity::Info,
    Severity::Warn,
    Severity::Error,
    Severity::Fatal,
    Severity::Unknown,
];

impl Severity {
    /// Normalizes a severity string: uppercase, trim, synonym mapping.
    ///
    /// Unrecognized four-character-or-longer inputs fall back to a prefix
    /// match; anything else collapses to `Info`.
    #[must_use]
    pub fn from_text(text: &str) -> Severity {
        let token = text.trim().to_ascii_uppercase();
        match token.as_str() {
            "TRACE" | "TRC" => Severity::Trace,
            "DEBUG" | "DBG" | "DEB" => Severity::Debug,
            "INFO" | "INFORMATION" | "INF" => Severity::Info,
            "WARN" | "WARNING" | "WRN" | "WRNG" => Severity::Warn,
            "ERROR" | "ERR" | "ERRO" => Severity::Error,
            "FATAL" | "FTL" | "CRITICAL" | "CRIT" | "PANIC" | "PNC" => Severity::Fatal,
            _ => Severity::from_prefix(&token),
        }
    }

    /// Prefix fallback for levels like `WARNING:` fragments or truncated
    /// tokens. Requires at least four characters to avoid false positives.
    fn from_prefix(token: &str) -> Severity {
        if token.len() >= 4 {
            for (name, severity) in [
                ("TRACE", Severity::Trace),
                ("DEBUG", Severity::Debug),
                ("INFO", Severity::Info),
                ("WARN", Severity::Warn),
                ("ERRO", Severity::Error),
                ("FATA", Severity::Fatal),
                ("CRIT", Severity::Fatal),
                ("PANI", Severity::Fatal),
            ] {
                if token.starts_with(name) || name.starts_with(token) {
                    return severity;
                }
            }
        }
        Severity::Info
    }

    /// Maps an OTLP severity number (1–24) onto a normalized severity.
    ///
    /// Numbers outside the OTLP range, including the `UNSPECIFIED` zero,
    /// map to `Unknown`.
    #[must_use]
    pub fn from_number(number: i32) -> Severity {
        match number {
            1..=4 => Severity::Trace,
            5..=8 => Severity::Debug,
            9..=12 => Severity::Info,
            13..=16 => Severity::Warn,
            17..=20 => Severity::Error,
            21..=24 => Severity::Fatal,
            _ => Severity::Unknown,
        }
    }

    /// The representative OTLP severity number for this level (the lowest
    /// number of its OTLP range; 0 for `Unknown`).
    #[must_use]
    pub fn number(self) -> i32 {
        match self {
            Severity::Trace => 1,
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
            Severity::Fatal => 21,
            Severity::Unknown => 0,
        }
    }

    /// The canonical uppercase token for this severity.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonyms_collapse() {
        assert_eq!(Severity::from_text("trc"), Severity::Trace);
        assert_eq!(Severity::from_text("DBG"), Severity::Debug);
        assert_eq!(Severity::from_text("information"), Severity::Info);
        assert_eq!(Severity::from_text("warning"), Severity::Warn);
        assert_eq!(Severity::from_text(" wrng "), Severity::Warn);
        assert_eq!(Severity::from_text("erro"), Severity::Error);
        assert_eq!(Severity::from_text("CRITICAL"), Severity::Fatal);
        assert_eq!(Severity::from_text("panic"), Severity::Fatal);
    }

    #[test]
    fn prefix_fallback_requires_four_chars() {
        assert_eq!(Severity::from_text("WARNI"), Severity::Warn);
        assert_eq!(Severity::from_text("DEBUGGING"), Severity::Debug);
        assert_eq!(Severity::from_text("CRITIC"), Severity::Fatal);
        // Too short for the prefix fallback.
        assert_eq!(Severity::from_text("WA"), Severity::Info);
        assert_eq!(Severity::from_text("xyzzy"), Severity::Info);
    }

    #[test]
    fn otlp_number_ranges() {
        assert_eq!(Severity::from_number(1), Severity::Trace);
        assert_eq!(Severity::from_number(8), Severity::Debug);
        assert_eq!(Severity::from_number(9), Severity::Info);
        assert_eq!(Severity::from_number(16), Severity::Warn);
        assert_eq!(Severity::from_number(17), Severity::Error);
        assert_eq!(Severity::from_number(24), Severity::Fatal);
        assert_eq!(Severity::from_number(0), Severity::Unknown);
        assert_eq!(Severity::from_number(25), Severity::Unknown);
    }

    #[test]
    fn representative_numbers_round_trip() {
        for severity in ALL_SEVERITIES {
            if severity != Severity::Unknown {
                assert_eq!(Severity::from_number(severity.number()), severity);
            }
        }
    }
}
