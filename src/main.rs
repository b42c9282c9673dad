// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! The tailscope binary: CLI parsing, pipeline startup, shutdown.
//!
//! Runs the ingestion-and-analysis pipeline headless: stdin (plus any
//! configured files and OTLP endpoints) feeds the pipeline until EOF or
//! Ctrl-C, then the final snapshot envelope is written to stdout as JSON.
//! Diagnostics go to stderr via `tracing`.

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tailscope_config::{
    DEFAULT_LOG_BUFFER, DEFAULT_MAX_ATTRIBUTE_VALUES, DEFAULT_MEMORY_SIZE,
    DEFAULT_OTLP_GRPC_PORT, DEFAULT_OTLP_HTTP_PORT, PipelineConfig,
};
use tailscope_ingest::{Pipeline, PipelineOptions};
use tailscope_pdata::formatdef::CompiledFormat;

/// Real-time log analysis pipeline: multi-source ingestion, frequency
/// and severity analytics, online template clustering.
#[derive(Parser, Debug)]
#[command(name = "tailscope", version, about)]
struct Cli {
    /// Shared capacity of each frequency map (words, phrases, attributes).
    #[arg(
        long = "memory-size",
        default_value_t = DEFAULT_MEMORY_SIZE,
        env = "TAILSCOPE_MEMORY_SIZE"
    )]
    memory_size: usize,

    /// Aggregation interval: one of 500ms, 1s, 2s, 5s, 10s, 30s, 1m.
    #[arg(
        long = "update-interval",
        default_value = "1s",
        env = "TAILSCOPE_UPDATE_INTERVAL",
        value_parser = humantime::parse_duration
    )]
    update_interval: Duration,

    /// Capacity of the bounded log buffer kept for inspection.
    #[arg(
        long = "log-buffer",
        default_value_t = DEFAULT_LOG_BUFFER,
        env = "TAILSCOPE_LOG_BUFFER"
    )]
    log_buffer: usize,

    /// Files or glob patterns to ingest (comma-separated or repeated).
    #[arg(
        long = "files",
        short = 'f',
        env = "TAILSCOPE_FILES",
        value_delimiter = ','
    )]
    files: Vec<String>,

    /// Keep watching files for appended lines and rotations.
    #[arg(long, env = "TAILSCOPE_FOLLOW")]
    follow: bool,

    /// Serve the OTLP logs receiver (gRPC + HTTP).
    #[arg(long = "otlp-enabled", env = "TAILSCOPE_OTLP_ENABLED")]
    otlp_enabled: bool,

    /// Port of the OTLP gRPC logs service.
    #[arg(
        long = "otlp-grpc-port",
        default_value_t = DEFAULT_OTLP_GRPC_PORT,
        env = "TAILSCOPE_OTLP_GRPC_PORT"
    )]
    otlp_grpc_port: u16,

    /// Port of the OTLP HTTP logs endpoint.
    #[arg(
        long = "otlp-http-port",
        default_value_t = DEFAULT_OTLP_HTTP_PORT,
        env = "TAILSCOPE_OTLP_HTTP_PORT"
    )]
    otlp_http_port: u16,

    /// Extra stop words excluded from the word frequency view.
    #[arg(
        long = "stop-words",
        env = "TAILSCOPE_STOP_WORDS",
        value_delimiter = ','
    )]
    stop_words: Vec<String>,

    /// Custom format definition file (YAML).
    #[arg(long = "format", env = "TAILSCOPE_FORMAT")]
    format: Option<PathBuf>,

    /// Cap on distinct values tracked per attribute key in lifetime
    /// histograms.
    #[arg(
        long = "max-attribute-values",
        default_value_t = DEFAULT_MAX_ATTRIBUTE_VALUES,
        env = "TAILSCOPE_MAX_ATTRIBUTE_VALUES"
    )]
    max_attribute_values: usize,
}

impl Cli {
    fn into_config(self) -> (PipelineConfig, Option<PathBuf>) {
        let format_file = self.format.clone();
        let config = PipelineConfig {
            memory_size: self.memory_size,
            update_interval: self.update_interval,
            log_buffer: self.log_buffer,
            files: self.files,
            follow: self.follow,
            otlp_enabled: self.otlp_enabled,
            otlp_grpc_port: self.otlp_grpc_port,
            otlp_http_port: self.otlp_http_port,
            stop_words: self.stop_words,
            format_file: self.format,
            max_attribute_values: self.max_attribute_values,
        };
        (config, format_file)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (config, format_file) = cli.into_config();
    let config = config.validated().context("invalid configuration")?;

    let format = match &format_file {
        Some(path) => Some(
            CompiledFormat::from_yaml_file(path)
                .with_context(|| format!("loading format definition {}", path.display()))?,
        ),
        None => None,
    };
    if let Some(format) = &format {
        info!(format = format.name(), "custom format loaded");
    }

    let mut pipeline = Pipeline::start(PipelineOptions {
        config,
        format,
        read_stdin: true,
    })
    .await
    .context("starting pipeline")?;

    // Mirror perimeter diagnostics to the log; a full UI would render
    // them as per-source status lines instead.
    if let Some(mut diagnostics) = pipeline.take_diagnostics() {
        let _ = tokio::spawn(async move {
            while let Some(event) = diagnostics.recv().await {
                warn!(?event, "source diagnostic");
            }
        });
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("interrupt received; draining");
        }
        _ = pipeline.finished() => {
            info!("all sources closed; finishing");
        }
    }

    let snapshot = pipeline.shutdown().await;
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &*snapshot).context("writing final snapshot")?;
    writeln!(stdout).context("writing final snapshot")?;
    Ok(())
}
