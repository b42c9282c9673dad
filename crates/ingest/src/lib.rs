// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Source multiplexing and the single-consumer analysis pipeline.
//!
//! The [`Pipeline`] supervisor spawns one producer task per input source
//! (stdin, files, the OTLP receiver endpoints) and a single consumer task
//! owning all analytic state. Producers and consumer communicate only
//! through one bounded line channel; readers observe state only through
//! published snapshots. One cancellation token tears the whole thing
//! down: producers drain and close, the consumer drains to channel close,
//! publishes a final snapshot and exits.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tailscope_analysis::snapshot::Snapshot;
use tailscope_config::PipelineConfig;
use tailscope_pdata::formatdef::CompiledFormat;

use crate::consumer::{Consumer, ControlMsg};
use crate::diag::Diagnostic;
use crate::publish::{SnapshotHandle, snapshot_slot};
use crate::sources::LINE_CHANNEL_CAPACITY;
use crate::sources::otlp::OtlpForwarder;

pub mod consumer;
pub mod diag;
pub mod error;
pub mod publish;
pub mod reassembly;
pub mod sources;

pub use error::Error;

/// Capacity of the control channel (pause/resume/reset).
const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// Everything needed to start a pipeline.
#[derive(Debug)]
pub struct PipelineOptions {
    /// The validated pipeline configuration.
    pub config: PipelineConfig,
    /// Optional compiled custom format tried before builtin detection.
    pub format: Option<CompiledFormat>,
    /// Attach the stdin source. Disabled by embedding tests that drive
    /// the pipeline through files or OTLP only.
    pub read_stdin: bool,
}

impl PipelineOptions {
    /// Options with stdin attached and no custom format.
    #[must_use]
    pub fn new(config: PipelineConfig) -> PipelineOptions {
        PipelineOptions {
            config,
            format: None,
            read_stdin: true,
        }
    }
}

/// A running pipeline: its producer tasks, its consumer task, and the
/// handles readers use to observe and steer it.
pub struct Pipeline {
    snapshot: SnapshotHandle,
    control: mpsc::Sender<ControlMsg>,
    cancel: CancellationToken,
    finished: CancellationToken,
    consumer_task: JoinHandle<()>,
    producer_tasks: Vec<JoinHandle<()>>,
    diagnostics: Option<mpsc::Receiver<Diagnostic>>,
}

impl Pipeline {
    /// Spawns all configured sources and the consumer.
    ///
    /// Fails when an OTLP endpoint cannot bind or when no usable source
    /// remains after expansion; per-source problems short of that are
    /// diagnostics, not errors.
    pub async fn start(options: PipelineOptions) -> Result<Pipeline, Error> {
        let cancel = CancellationToken::new();
        let (line_tx, line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (diag_tx, diag_rx) = diag::channel();
        let (publisher, snapshot) = snapshot_slot();

        let mut producer_tasks = Vec::new();
        let mut active_sources = 0usize;

        if options.read_stdin {
            active_sources += 1;
            producer_tasks.push(tokio::spawn(sources::stdin::run(
                line_tx.clone(),
                diag_tx.clone(),
                cancel.clone(),
            )));
        }

        let files = sources::file::expand_patterns(&options.config.files, &diag_tx);
        for path in files {
            active_sources += 1;
            producer_tasks.push(tokio::spawn(sources::file::run(
                path,
                options.config.follow,
                line_tx.clone(),
                diag_tx.clone(),
                cancel.clone(),
            )));
        }

        if options.config.otlp_enabled {
            let forwarder = OtlpForwarder::new(line_tx.clone(), diag_tx.clone());
            producer_tasks.push(
                spawn_grpc(
                    options.config.otlp_grpc_port,
                    forwarder.clone(),
                    cancel.clone(),
                )
                .await?,
            );
            producer_tasks
                .push(spawn_http(options.config.otlp_http_port, forwarder, cancel.clone()).await?);
            active_sources += 1;
        }

        if active_sources == 0 {
            cancel.cancel();
            return Err(Error::NoSources);
        }

        // The consumer sees channel close once every producer is gone.
        drop(line_tx);

        let consumer = Consumer::new(
            &options.config,
            options.format,
            publisher,
            active_sources,
        );
        let interval = options.config.update_interval;
        let finished = CancellationToken::new();
        let consumer_task = {
            let finished = finished.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                consumer.run(line_rx, control_rx, cancel, interval).await;
                finished.cancel();
            })
        };

        info!(active_sources, "pipeline started");
        Ok(Pipeline {
            snapshot,
            control: control_tx,
            cancel,
            finished,
            consumer_task,
            producer_tasks,
            diagnostics: Some(diag_rx),
        })
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load()
    }

    /// A cheap cloneable handle for other readers.
    #[must_use]
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    /// Takes the diagnostics receiver; available once.
    pub fn take_diagnostics(&mut self) -> Option<mpsc::Receiver<Diagnostic>> {
        self.diagnostics.take()
    }

    /// Defers analysis stages until [`Pipeline::resume`].
    pub async fn pause(&self) {
        let _ = self.control.send(ControlMsg::Pause).await;
    }

    /// Replays deferred records and resumes full analysis.
    pub async fn resume(&self) {
        let _ = self.control.send(ControlMsg::Resume).await;
    }

    /// Clears frequency memory and all template engines; lifetime
    /// counters and the log buffer survive.
    pub async fn reset(&self) {
        let _ = self.control.send(ControlMsg::Reset).await;
    }

    /// Completes once every producer has closed and the consumer has
    /// drained and exited, e.g. after stdin EOF with no other sources.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Cancels every task, waits for the drain, and returns the final
    /// snapshot.
    pub async fn shutdown(self) -> Arc<Snapshot> {
        self.cancel.cancel();
        for task in self.producer_tasks {
            let _ = task.await;
        }
        let _ = self.consumer_task.await;
        self.snapshot.load()
    }
}

async fn spawn_grpc(
    port: u16,
    forwarder: OtlpForwarder,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|e| Error::BindFailed {
        endpoint: "gRPC",
        addr: addr.clone(),
        details: e.to_string(),
    })?;
    info!(addr = %addr, "OTLP gRPC endpoint listening");
    Ok(tokio::spawn(async move {
        if let Err(e) = sources::otlp::serve_grpc(listener, forwarder, cancel).await {
            error!(error = %e, "OTLP gRPC server failed");
        }
    }))
}

async fn spawn_http(
    port: u16,
    forwarder: OtlpForwarder,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|e| Error::BindFailed {
        endpoint: "HTTP",
        addr: addr.clone(),
        details: e.to_string(),
    })?;
    info!(addr = %addr, "OTLP HTTP endpoint listening");
    Ok(tokio::spawn(async move {
        if let Err(e) = sources::otlp::serve_http(listener, forwarder, cancel).await {
            error!(error = %e, "OTLP HTTP server failed");
        }
    }))
}
