// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! File sources: glob expansion, full initial read, tail-follow with
//! rotation detection.
//!
//! Each file is read to its end first. In follow mode a `notify` watcher
//! on the parent directory then signals appended writes; a size decrease
//! is taken as rotation and the file is re-read from offset zero. A slow
//! poll backs up the watcher so a lost event never wedges the tail.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::diag::{Diagnostic, DiagnosticSender};

/// Fallback poll period backing up the watcher in follow mode.
const FALLBACK_POLL: Duration = Duration::from_secs(1);

/// Characters that mark a pattern as a glob rather than a literal path.
fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Expands file patterns into a deduplicated, stable-sorted path list.
/// Unusable patterns and unreadable paths are skipped with a diagnostic;
/// they never abort the remaining sources.
pub(crate) fn expand_patterns(
    patterns: &[String],
    diagnostics: &DiagnosticSender,
) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if is_glob(pattern) {
            match glob::glob(pattern) {
                Ok(entries) => {
                    let mut matched = false;
                    for entry in entries {
                        match entry {
                            Ok(path) => {
                                matched = true;
                                push_canonical(&path, &mut paths, diagnostics);
                            }
                            Err(e) => {
                                diagnostics.emit(Diagnostic::SourceSkipped {
                                    source: e.path().display().to_string(),
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                    if !matched {
                        warn!(pattern = %pattern, "glob matched no files");
                        diagnostics.emit(Diagnostic::SourceSkipped {
                            source: pattern.clone(),
                            reason: "no matches".to_owned(),
                        });
                    }
                }
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "invalid glob pattern");
                    diagnostics.emit(Diagnostic::SourceSkipped {
                        source: pattern.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        } else {
            push_canonical(Path::new(pattern), &mut paths, diagnostics);
        }
    }
    paths.sort();
    paths.dedup();
    paths
}

fn push_canonical(path: &Path, into: &mut Vec<PathBuf>, diagnostics: &DiagnosticSender) {
    match std::fs::canonicalize(path) {
        Ok(canonical) => into.push(canonical),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable path");
            diagnostics.emit(Diagnostic::SourceSkipped {
                source: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    }
}

/// Positional reader keeping the byte offset and the trailing partial
/// line between reads.
#[derive(Debug)]
pub(crate) struct Tailer {
    path: PathBuf,
    offset: u64,
    pending: Vec<u8>,
}

impl Tailer {
    pub(crate) fn new(path: PathBuf) -> Tailer {
        Tailer {
            path,
            offset: 0,
            pending: Vec::new(),
        }
    }

    /// Reads everything appended since the last call, emitting complete
    /// lines. A shrunken file means rotation: the offset rewinds to zero
    /// so the new generation is read from its start. Returns `false` when
    /// the line channel has closed.
    pub(crate) async fn read_new(&mut self, tx: &mpsc::Sender<String>) -> std::io::Result<bool> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if metadata.len() < self.offset {
            debug!(path = %self.path.display(), "file shrank; assuming rotation");
            self.offset = 0;
            self.pending.clear();
        }
        if metadata.len() == self.offset {
            return Ok(true);
        }
        let mut file = tokio::fs::File::open(&self.path).await?;
        let _ = file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        let read = file.read_to_end(&mut buf).await?;
        self.offset += read as u64;
        self.pending.extend_from_slice(&buf);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line_bytes: Vec<u8> = self.pending.drain(..=pos).collect();
            let _ = line_bytes.pop(); // the newline itself
            if line_bytes.last() == Some(&b'\r') {
                let _ = line_bytes.pop();
            }
            let line = String::from_utf8_lossy(&line_bytes).into_owned();
            if tx.send(line).await.is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The trailing line without a newline terminator, if any.
    pub(crate) fn take_pending(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned())
        }
    }
}

/// Runs one file source to completion: full read, then (in follow mode)
/// tail until cancellation.
pub(crate) async fn run(
    path: PathBuf,
    follow: bool,
    tx: mpsc::Sender<String>,
    diagnostics: DiagnosticSender,
    cancel: CancellationToken,
) {
    let path_display = path.display().to_string();
    let mut tailer = Tailer::new(path.clone());

    match tailer.read_new(&tx).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            warn!(path = %path_display, error = %e, "initial read failed");
            diagnostics.emit(Diagnostic::SourceSkipped {
                source: path_display.clone(),
                reason: e.to_string(),
            });
            return;
        }
    }

    if !follow {
        if let Some(tail) = tailer.take_pending() {
            let _ = tx.send(tail).await;
        }
        diagnostics.emit(Diagnostic::SourceEnded { source: path_display });
        return;
    }

    // Watch the parent directory so rotation re-creates are seen too.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let watch_target = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
    let watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let _ = event_tx.send(result);
        },
        notify::Config::default(),
    )
    .and_then(|mut watcher| {
        watcher
            .watch(&watch_target, RecursiveMode::NonRecursive)
            .map(|()| watcher)
    });
    let _watcher = match watcher {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(path = %path_display, error = %e, "watcher unavailable; polling only");
            diagnostics.emit(Diagnostic::WatcherError {
                path: path_display.clone(),
                details: e.to_string(),
            });
            None
        }
    };

    let mut poll = tokio::time::interval(FALLBACK_POLL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut watcher_active = _watcher.is_some();
    loop {
        let relevant = tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_rx.recv(), if watcher_active => match event {
                Some(Ok(event)) => {
                    event.paths.is_empty() || event.paths.iter().any(|p| p == &path)
                }
                Some(Err(e)) => {
                    diagnostics.emit(Diagnostic::WatcherError {
                        path: path_display.clone(),
                        details: e.to_string(),
                    });
                    false
                }
                None => {
                    // Watcher gone; the poll keeps the tail alive.
                    watcher_active = false;
                    false
                }
            },
            _ = poll.tick() => true,
        };
        if !relevant {
            continue;
        }
        match tailer.read_new(&tx).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                // The file may be mid-rotation; the next event or poll
                // retries.
                debug!(path = %path_display, error = %e, "read failed; will retry");
            }
        }
    }
    diagnostics.emit(Diagnostic::SourceEnded { source: path_display });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create file");
        file.write_all(contents.as_bytes()).expect("write file");
        path
    }

    async fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn glob_expansion_is_sorted_and_deduplicated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _ = write_file(&dir, "b.log", "");
        let _ = write_file(&dir, "a.log", "");
        let _ = write_file(&dir, "c.txt", "");
        let pattern = dir.path().join("*.log").display().to_string();
        let literal = dir.path().join("a.log").display().to_string();
        let (diagnostics, _rx) = crate::diag::channel();

        // The literal duplicates a glob match; expansion dedups it.
        let paths = expand_patterns(&[pattern, literal], &diagnostics);
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("a.log"));
        assert!(paths[1].ends_with("b.log"));
    }

    #[test]
    fn missing_paths_are_skipped_with_diagnostics() {
        let (diagnostics, mut rx) = crate::diag::channel();
        let paths = expand_patterns(&["/definitely/not/here.log".to_owned()], &diagnostics);
        assert!(paths.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Ok(Diagnostic::SourceSkipped { .. })
        ));
    }

    #[tokio::test]
    async fn initial_read_delivers_all_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "app.log", "one\ntwo\nthree\n");
        let (tx, mut rx) = mpsc::channel(100);
        let (diagnostics, _diag_rx) = crate::diag::channel();
        run(path, false, tx, diagnostics, CancellationToken::new()).await;
        assert_eq!(drain(&mut rx).await, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn trailing_partial_line_flushed_without_follow() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "app.log", "complete\npartial");
        let (tx, mut rx) = mpsc::channel(100);
        let (diagnostics, _diag_rx) = crate::diag::channel();
        run(path, false, tx, diagnostics, CancellationToken::new()).await;
        assert_eq!(drain(&mut rx).await, vec!["complete", "partial"]);
    }

    #[tokio::test]
    async fn appended_lines_picked_up_from_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "app.log", "first\n");
        let (tx, mut rx) = mpsc::channel(100);
        let mut tailer = Tailer::new(path.clone());
        assert!(tailer.read_new(&tx).await.expect("read"));
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .expect("reopen");
            file.write_all(b"second\n").expect("append");
        }
        assert!(tailer.read_new(&tx).await.expect("read"));
        assert_eq!(drain(&mut rx).await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn shrunken_file_reopens_from_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "app.log", "old-one\nold-two\n");
        let (tx, mut rx) = mpsc::channel(100);
        let mut tailer = Tailer::new(path.clone());
        assert!(tailer.read_new(&tx).await.expect("read"));
        // Rotation: a fresh, shorter file appears under the same name.
        let _ = write_file(&dir, "app.log", "new\n");
        assert!(tailer.read_new(&tx).await.expect("read"));
        assert_eq!(drain(&mut rx).await, vec!["old-one", "old-two", "new"]);
    }

    #[tokio::test]
    async fn partial_lines_joined_across_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "app.log", "abc");
        let (tx, mut rx) = mpsc::channel(100);
        let mut tailer = Tailer::new(path.clone());
        assert!(tailer.read_new(&tx).await.expect("read"));
        assert!(drain(&mut rx).await.is_empty());
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .expect("reopen");
            file.write_all(b"def\n").expect("append");
        }
        assert!(tailer.read_new(&tx).await.expect("read"));
        assert_eq!(drain(&mut rx).await, vec!["abcdef"]);
    }
}
