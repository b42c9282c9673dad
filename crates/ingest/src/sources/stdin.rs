// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Standard-input line source.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::diag::{Diagnostic, DiagnosticSender};

/// Read buffer for stdin; lines up to 1 MiB are expected.
const STDIN_BUFFER_BYTES: usize = 1024 * 1024;

/// Reads line-delimited UTF-8 from stdin until EOF or cancellation.
/// Back-pressures on a full channel.
pub(crate) async fn run(
    tx: mpsc::Sender<String>,
    diagnostics: DiagnosticSender,
    cancel: CancellationToken,
) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::with_capacity(STDIN_BUFFER_BYTES, stdin).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin reached EOF");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            },
        }
    }
    diagnostics.emit(Diagnostic::SourceEnded {
        source: "stdin".to_owned(),
    });
}
