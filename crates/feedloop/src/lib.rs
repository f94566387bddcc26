// ai
//! 🛰️ feedloop: finite datasets, infinite streams.
//!
//! 🎬 *[a call center that never closes. a sky that never empties. both of them are a JSONL
//! file and a cursor that refuses to stop at the end.]*
//!
//! 🧠 Knowledge graph, leaf first:
//! - [`records`]: what gets streamed; [`dataset`]: where it's loaded from, and the cursor
//!   that walks it
//! - [`rate_control`], [`token`]: pacing, backoff and bearer credentials
//! - [`upstreams`]: local datasets, OpenSky, another feedloop's polling API
//! - [`fetcher`]: one paced, retried, stamped pull; [`emitter`]: a paced sequence of them
//! - [`workers`]: an emitter spawned onto the runtime, feeding a bounded channel
//! - [`adapters`]: the streaming framework's partition contract, and the HTTP surface
//! - [`feeds`]: the composition root; [`app_config`]: how it's configured
//!
//! The three entry points below are what the CLI calls: [`run`] serves HTTP, [`drain`]
//! measures throughput, [`generate`] writes a synthetic dataset.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod adapters;
pub mod app_config;
pub mod dataset;
pub mod emitter;
pub mod error;
pub mod feeds;
pub mod fetcher;
pub mod progress;
pub mod rate_control;
pub mod records;
pub mod token;
pub mod upstreams;
pub mod workers;

use crate::adapters::http::{AppState, router};
use crate::app_config::AppConfig;
use crate::dataset::synthetic::{self, SyntheticConfig, SyntheticGenerator};
use crate::emitter::{ChunkedStreamEmitter, EmitterConfig};
use crate::feeds::{Feeds, TranscriptFeed};
use crate::fetcher::BatchFetcher;
use crate::progress::{DrainReport, ProgressMetrics};
use crate::rate_control::RateController;
use crate::upstreams::{TranscriptApiConfig, TranscriptApiUpstream, TranscriptUpstream, Upstream};
use crate::workers::{StreamEvent, spawn_stream};

/// 🚀 Build the feeds, mount the router, and serve until Ctrl-C.
pub async fn run(app_config: AppConfig) -> Result<()> {
    let feeds = Feeds::from_config(&app_config)
        .await
        .context("💀 The feeds could not be assembled. Check the dataset path and the flight source.")?;
    let app = router(AppState {
        feeds,
        runtime: app_config.runtime.clone(),
    });

    let address = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("💀 Could not bind {address}. Is something else already listening there?"))?;
    info!("🌐 feedloop listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("💀 The HTTP server stopped unexpectedly")?;
    info!("👋 feedloop shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ could not listen for Ctrl-C ({e}); serving until killed");
        std::future::pending::<()>().await;
    }
    info!("🛑 Ctrl-C received; draining open connections");
}

/// 🎛️ One `drain` run.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainOptions {
    pub chunk_size: usize,
    /// 🎯 records to pull before stopping; 0 means until Ctrl-C
    pub total: u64,
    pub chunk_delay: Duration,
    /// 🌐 poll another feedloop at this base URL instead of loading a dataset locally
    pub from: Option<String>,
}

/// 📊 The standalone throughput harness: stream as fast as the knobs allow, draw the
/// progress, and report whether it keeps up with 500k calls a day.
pub async fn drain(app_config: AppConfig, options: DrainOptions) -> Result<DrainReport> {
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl-C received; finishing the drain");
            on_ctrl_c.cancel();
        }
    });

    let emitter_config = EmitterConfig {
        chunk_size: options.chunk_size.max(1),
        target_total: (options.total > 0).then_some(options.total),
        chunk_delay: options.chunk_delay,
        max_duration: None,
    };

    let emitter = match &options.from {
        Some(base_url) => {
            let api_config = TranscriptApiConfig {
                base_url: base_url.clone(),
                pacing: app_config.transcript.pacing.clone(),
            };
            let upstream = TranscriptApiUpstream::new(&api_config)
                .with_context(|| format!("💀 Could not set up a client for {base_url}"))?;
            upstream.check_connection().await;
            let fetcher = BatchFetcher::new(
                TranscriptUpstream::Api(upstream),
                Arc::new(RateController::new(api_config.pacing.rate_policy())),
                api_config.pacing.request_timeout(),
            );
            ChunkedStreamEmitter::new(fetcher, emitter_config, cancel.clone())
        }
        None => {
            let feed = TranscriptFeed::from_config(&app_config.transcript)
                .await
                .context("💀 The transcript dataset could not be loaded for draining")?;
            feed.session(None, emitter_config, cancel.clone())?
        }
    };

    drain_emitter(emitter, cancel, options.total, app_config.runtime.stream_buffer).await
}

async fn drain_emitter<U: Upstream + 'static>(
    emitter: ChunkedStreamEmitter<U>,
    cancel: CancellationToken,
    total: u64,
    buffer: usize,
) -> Result<DrainReport> {
    let mut metrics = ProgressMetrics::new(emitter.upstream().describe(), total);
    let (rx, worker) = spawn_stream(emitter, cancel, buffer);

    let mut failure = None;
    while let Ok(event) = rx.recv().await {
        match event {
            StreamEvent::Chunk(chunk) => metrics.update(chunk.records.len() as u64),
            StreamEvent::Complete(summary) => {
                info!("🏁 drain complete: {:?}", summary.reason);
            }
            StreamEvent::Failed { error, kind } => failure = Some(anyhow!("stream failed ({kind}): {error}")),
        }
    }
    worker
        .await
        .context("💀 The stream worker panicked")?
        .context("💀 The stream worker gave up")?;

    let report = metrics.finish();
    match failure {
        Some(error) => Err(error.context(format!(
            "💀 The drain stopped after {} records",
            report.total_records
        ))),
        None => Ok(report),
    }
}

/// 🎭 Write a synthetic call-center dataset to `out` (gzipped when it ends in `.gz`).
pub fn generate(config: SyntheticConfig, out: &Path) -> Result<usize> {
    let conversations = config.conversations;
    let utterances = SyntheticGenerator::new(config).generate();
    let written = synthetic::write_jsonl(out, &utterances)
        .with_context(|| format!("💀 Could not write the dataset to '{}'", out.display()))?;
    info!(
        "🎭 wrote {written} utterances across {conversations} conversations to {}",
        out.display()
    );
    Ok(written)
}
