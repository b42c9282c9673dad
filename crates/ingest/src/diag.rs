// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Perimeter diagnostics surfaced to the embedding application.
//!
//! I/O faults never stop the pipeline; they are logged and mirrored onto
//! this bounded channel so a UI can show per-source status without
//! scraping stderr. When nobody listens (or the channel is full) the
//! events are simply dropped.

use tokio::sync::mpsc;

/// Capacity of the diagnostics channel.
const DIAGNOSTICS_CAPACITY: usize = 64;

/// One perimeter event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A configured source could not be opened and was skipped.
    SourceSkipped {
        /// The source description (path or pattern).
        source: String,
        /// Why it was skipped.
        reason: String,
    },
    /// A source reached its end (EOF, task exit) and detached.
    SourceEnded {
        /// The source description.
        source: String,
    },
    /// The OTLP receiver dropped lines because the pipeline was full.
    OtlpLinesDropped {
        /// How many lines were dropped in this burst.
        count: u64,
    },
    /// The file watcher reported an error; following continues best-effort.
    WatcherError {
        /// The watched path.
        path: String,
        /// Human-readable details.
        details: String,
    },
}

/// Creates the bounded diagnostics channel.
#[must_use]
pub fn channel() -> (DiagnosticSender, mpsc::Receiver<Diagnostic>) {
    let (tx, rx) = mpsc::channel(DIAGNOSTICS_CAPACITY);
    (DiagnosticSender { tx }, rx)
}

/// Non-blocking sender; cheap to clone into every producer task.
#[derive(Debug, Clone)]
pub struct DiagnosticSender {
    tx: mpsc::Sender<Diagnostic>,
}

impl DiagnosticSender {
    /// Emits one event; silently dropped when the channel is full or
    /// closed.
    pub fn emit(&self, diagnostic: Diagnostic) {
        let _ = self.tx.try_send(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_flow_and_overflow_drops() {
        let (tx, mut rx) = channel();
        tx.emit(Diagnostic::SourceEnded {
            source: "stdin".to_owned(),
        });
        assert_eq!(
            rx.recv().await,
            Some(Diagnostic::SourceEnded {
                source: "stdin".to_owned()
            })
        );

        // Overfill; emit never blocks or errors.
        for _ in 0..(DIAGNOSTICS_CAPACITY + 10) {
            tx.emit(Diagnostic::OtlpLinesDropped { count: 1 });
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, DIAGNOSTICS_CAPACITY);
    }
}
