// ai
//! 🌐 The HTTP adapter: an axum router over both feeds.
//!
//! 🎬 *[GET /transcript/stream/continuous. the browser tab stays open for three days.]*
//! *[somebody closes the laptop. the SSE body drops. the drop guard fires. the worker
//! notices on its next send, and the emitter's rate-limit nap ends early. nothing leaks.]*
//!
//! 🧠 Knowledge graph:
//! - Plain JSON: `/`, `/health`, `/transcript/status`, `/transcript/utterances`,
//!   `/opensky/status`, `/opensky/flights`.
//! - Server-sent events: `/transcript/stream`, `/transcript/stream/high-throughput`,
//!   `/transcript/stream/continuous`, `/opensky/stream`. Each request gets its own emitter,
//!   spawned as a `StreamWorker`, drained through a bounded channel. Each endpoint renders
//!   the same `StreamEvent`s into its own JSON shape.
//! - Query parameters are range-checked here; a bad one is a 400 with
//!   `{"error": ..., "code": "configuration"}`, never a silently clamped value.
//! - `FeedError`s map to statuses through [`ApiError`]. 🦆

use std::convert::Infallible;
use std::time::Duration;

use async_channel::Receiver;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::app_config::RuntimeConfig;
use crate::dataset::Cursor;
use crate::emitter::EmitterConfig;
use crate::error::FeedError;
use crate::feeds::{FeedStatus, Feeds};
use crate::progress::{format_number, required_rate};
use crate::records::{FlightRecord, TranscriptRecord};
use crate::upstreams::Region;
use crate::workers::{StreamEvent, spawn_stream};

// ============================================================
//  💀 Errors
// ============================================================

/// 💀 A `FeedError` on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub FeedError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FeedError::Configuration(_) => StatusCode::BAD_REQUEST,
            FeedError::Authentication(_) => StatusCode::UNAUTHORIZED,
            FeedError::TransientUpstream(_) | FeedError::FetchFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            FeedError::Upstream { .. } | FeedError::Schema(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<FeedError> for ApiError {
    fn from(error: FeedError) -> Self {
        ApiError(error)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(FeedError::Configuration(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.0.to_string(), "code": self.0.kind() }));
        (self.status(), body).into_response()
    }
}

/// 📏 `value` must sit in `min..=max`, or the request is refused.
fn within<T: PartialOrd + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> Result<T, FeedError> {
    if value < min || value > max {
        return Err(FeedError::Configuration(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

/// ⏱️ Like [`within`], but NaN and infinity are refused before they get near a `Duration`.
fn seconds(name: &str, value: f64, min: f64, max: f64) -> Result<Duration, FeedError> {
    if !value.is_finite() {
        return Err(FeedError::Configuration(format!(
            "{name} must be a finite number of seconds, got {value}"
        )));
    }
    let value = within(name, value, min, max)?;
    Ok(Duration::from_secs_f64(value))
}

// ============================================================
//  🗺️ Router
// ============================================================

/// 🧳 What every handler gets.
#[derive(Debug, Clone)]
pub struct AppState {
    pub feeds: Feeds,
    pub runtime: RuntimeConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/transcript/status", get(transcript_status))
        .route("/transcript/utterances", get(transcript_utterances))
        .route("/transcript/stream", get(transcript_stream))
        .route("/transcript/stream/high-throughput", get(transcript_high_throughput))
        .route("/transcript/stream/continuous", get(transcript_continuous))
        .route("/opensky/status", get(opensky_status))
        .route("/opensky/flights", get(opensky_flights))
        .route("/opensky/stream", get(opensky_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================
//  📄 Plain JSON
// ============================================================

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "OpenSky & Transcript Data API",
        "version": env!("CARGO_PKG_VERSION"),
        "data_sources": ["opensky", "transcript"],
        "simulation": {
            "target": "500k calls/day",
            "required_throughput": format!("~{:.0} utterances/second", required_rate()),
            "dataset_size": format!("{} utterances", format_number(state.feeds.transcripts.dataset().len() as u64)),
        },
        "endpoints": {
            "opensky": {
                "status": "/opensky/status",
                "flights": "/opensky/flights",
                "stream": "/opensky/stream",
            },
            "transcript": {
                "status": "/transcript/status",
                "utterances": "/transcript/utterances",
                "stream": "/transcript/stream",
                "high_throughput_stream": "/transcript/stream/high-throughput",
                "continuous_stream": "/transcript/stream/continuous",
            },
        },
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "data_sources": { "opensky": "available", "transcript": "available" },
    }))
}

async fn transcript_status(State(state): State<AppState>) -> Json<FeedStatus> {
    Json(state.feeds.transcripts.status())
}

#[derive(Debug, Deserialize)]
struct UtterancesParams {
    #[serde(default = "default_utterance_limit")]
    limit: usize,
}

fn default_utterance_limit() -> usize {
    10
}

async fn transcript_utterances(
    State(state): State<AppState>,
    query: Result<Query<UtterancesParams>, QueryRejection>,
) -> Result<Json<Vec<TranscriptRecord>>, ApiError> {
    let Query(params) = query?;
    let limit = within("limit", params.limit, 1, 100)?;
    Ok(Json(state.feeds.transcripts.poll(limit).await?))
}

async fn opensky_status(State(state): State<AppState>) -> Json<FeedStatus> {
    Json(state.feeds.flights.status().await)
}

#[derive(Debug, Deserialize)]
struct FlightsParams {
    #[serde(default)]
    region: Option<Region>,
    #[serde(default = "default_flight_limit")]
    limit: usize,
}

fn default_flight_limit() -> usize {
    100
}

async fn opensky_flights(
    State(state): State<AppState>,
    query: Result<Query<FlightsParams>, QueryRejection>,
) -> Result<Json<Vec<FlightRecord>>, ApiError> {
    let Query(params) = query?;
    let limit = within("limit", params.limit, 1, 1000)?;
    let region = params.region.unwrap_or_else(|| state.feeds.flights.default_region());
    Ok(Json(state.feeds.flights.snapshot(region, limit).await?))
}

// ============================================================
//  🌊 Server-sent events
// ============================================================

/// 🌊 Drain a stream worker's channel as SSE, rendering each event with `render`.
///
/// The guard rides along inside the stream: when axum drops the body (client gone, or the
/// stream finished), the session's token is cancelled.
fn event_stream<E, F>(
    rx: Receiver<StreamEvent<E>>,
    guard: DropGuard,
    keep_alive: Duration,
    mut render: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    E: Send + 'static,
    F: FnMut(StreamEvent<E>) -> Option<Value> + Send + 'static,
{
    let events = rx.filter_map(move |event| {
        let _session = &guard;
        futures::future::ready(render(event).map(|payload| Ok(Event::default().data(payload.to_string()))))
    });
    Sse::new(events).keep_alive(KeepAlive::new().interval(keep_alive))
}

fn failed(error: String, kind: &str) -> Value {
    json!({
        "status": "failed",
        "error": error,
        "kind": kind,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn throughput_description(throughput: f64) -> String {
    format!("{throughput:.0} utterances/second")
}

#[derive(Debug, Deserialize)]
struct TranscriptStreamParams {
    #[serde(default = "default_utterance_delay")]
    utterance_delay: f64,
    #[serde(default = "default_max_utterances")]
    max_utterances: u64,
    /// ⏯️ resume from a cursor the client saw earlier; both or neither
    #[serde(default)]
    position: Option<usize>,
    #[serde(default)]
    loop_count: Option<u64>,
}

fn default_utterance_delay() -> f64 {
    0.5
}

fn default_max_utterances() -> u64 {
    50
}

/// 🎙️ One utterance per event, paced like a conversation.
async fn transcript_stream(
    State(state): State<AppState>,
    query: Result<Query<TranscriptStreamParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    let delay = seconds("utterance_delay", params.utterance_delay, 0.1, 5.0)?;
    let max = within("max_utterances", params.max_utterances, 5, 500)?;
    let start = match (params.position, params.loop_count) {
        (Some(position), loop_count) => Some(Cursor::new(position, loop_count.unwrap_or(0))),
        (None, Some(_)) => {
            return Err(FeedError::Configuration("loop_count needs a position to go with it".to_string()).into());
        }
        (None, None) => None,
    };

    let cancel = CancellationToken::new();
    let emitter = state.feeds.transcripts.session(
        start,
        EmitterConfig {
            chunk_size: 1,
            target_total: Some(max),
            chunk_delay: delay,
            max_duration: None,
        },
        cancel.clone(),
    )?;
    let (rx, _worker) = spawn_stream(emitter, cancel.clone(), state.runtime.stream_buffer);
    debug!("🎙️ transcript stream opened: {max} utterances every {delay:?}");

    Ok(event_stream(rx, cancel.drop_guard(), keep_alive(&state), move |event| match event {
        StreamEvent::Chunk(chunk) => chunk.records.into_iter().next().map(|utterance| {
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "utterance": utterance,
                "progress": format!("{}/{}", chunk.progress.emitted, max),
            })
        }),
        StreamEvent::Complete(summary) => Some(json!({ "status": "complete", "total": summary.total })),
        StreamEvent::Failed { error, kind } => Some(failed(error, kind)),
    }))
}

#[derive(Debug, Deserialize)]
struct HighThroughputParams {
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_total_utterances")]
    total_utterances: u64,
    #[serde(default = "default_chunk_delay")]
    chunk_delay: f64,
}

#[derive(Debug, Deserialize)]
struct ContinuousParams {
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_chunk_delay")]
    chunk_delay: f64,
}

fn default_chunk_size() -> usize {
    100
}

fn default_total_utterances() -> u64 {
    10_000
}

fn default_chunk_delay() -> f64 {
    0.01
}

/// 🚀 Big chunks, short pauses. `total_utterances=0` streams until the client leaves.
async fn transcript_high_throughput(
    State(state): State<AppState>,
    query: Result<Query<HighThroughputParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    let chunk_size = within("chunk_size", params.chunk_size, 10, 10_000)?;
    let total = within("total_utterances", params.total_utterances, 0, 1_000_000)?;
    let delay = seconds("chunk_delay", params.chunk_delay, 0.0, 1.0)?;

    let cancel = CancellationToken::new();
    let emitter = state.feeds.transcripts.session(
        None,
        EmitterConfig {
            chunk_size,
            target_total: (total > 0).then_some(total),
            chunk_delay: delay,
            max_duration: None,
        },
        cancel.clone(),
    )?;
    let (rx, _worker) = spawn_stream(emitter, cancel.clone(), state.runtime.stream_buffer);
    debug!("🚀 high-throughput stream opened: chunks of {chunk_size}, total {total}");

    Ok(event_stream(rx, cancel.drop_guard(), keep_alive(&state), |event| match event {
        StreamEvent::Chunk(chunk) => {
            let mut payload = json!({
                "timestamp": Utc::now().to_rfc3339(),
                "chunk_size": chunk.records.len(),
                "utterances": chunk.records,
                "stats": chunk.stats,
            });
            if let (Some(target), Some(percent)) = (chunk.progress.target, chunk.progress.percent) {
                payload["progress"] = json!({
                    "sent": chunk.progress.emitted,
                    "total": target,
                    "percent": percent,
                });
            }
            Some(payload)
        }
        StreamEvent::Complete(summary) => Some(json!({
            "status": "complete",
            "total": summary.total,
            "elapsed_seconds": summary.elapsed_seconds,
            "throughput": summary.throughput,
            "throughput_description": throughput_description(summary.throughput),
            "reason": summary.reason,
        })),
        StreamEvent::Failed { error, kind } => Some(failed(error, kind)),
    }))
}

/// ♾️ Chunks forever, numbered, until the client disconnects.
async fn transcript_continuous(
    State(state): State<AppState>,
    query: Result<Query<ContinuousParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    let chunk_size = within("chunk_size", params.chunk_size, 10, 10_000)?;
    let delay = seconds("chunk_delay", params.chunk_delay, 0.0, 1.0)?;

    let cancel = CancellationToken::new();
    let emitter = state.feeds.transcripts.session(
        None,
        EmitterConfig {
            chunk_size,
            target_total: None,
            chunk_delay: delay,
            max_duration: None,
        },
        cancel.clone(),
    )?;
    let (rx, _worker) = spawn_stream(emitter, cancel.clone(), state.runtime.stream_buffer);
    debug!("♾️ continuous stream opened: chunks of {chunk_size}");

    Ok(event_stream(rx, cancel.drop_guard(), keep_alive(&state), |event| match event {
        StreamEvent::Chunk(chunk) => Some(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "chunk_number": chunk.chunk_number,
            "chunk_size": chunk.records.len(),
            "utterances": chunk.records,
            "stats": {
                "total_sent": chunk.stats.total_sent,
                "elapsed_seconds": chunk.stats.elapsed_seconds,
                "throughput": chunk.stats.throughput,
                "throughput_description": throughput_description(chunk.stats.throughput),
            },
        })),
        // 🌵 only a non-looping dataset can end a continuous stream
        StreamEvent::Complete(summary) => Some(json!({
            "status": "complete",
            "total": summary.total,
            "reason": summary.reason,
        })),
        StreamEvent::Failed { error, kind } => Some(failed(error, kind)),
    }))
}

#[derive(Debug, Deserialize)]
struct FlightStreamParams {
    #[serde(default)]
    region: Option<Region>,
    #[serde(default = "default_flight_interval")]
    interval: f64,
    #[serde(default = "default_flight_duration")]
    duration: u64,
}

fn default_flight_interval() -> f64 {
    10.0
}

fn default_flight_duration() -> u64 {
    60
}

/// ✈️ One snapshot of the sky every `interval` seconds, for `duration` seconds.
async fn opensky_stream(
    State(state): State<AppState>,
    query: Result<Query<FlightStreamParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    let interval = seconds("interval", params.interval, 5.0, 60.0)?;
    let duration = within("duration", params.duration, 10, 600)?;
    let region = params.region.unwrap_or_else(|| state.feeds.flights.default_region());

    let cancel = CancellationToken::new();
    let emitter = state.feeds.flights.session(
        region,
        EmitterConfig {
            chunk_size: state.feeds.flights.snapshot_size(),
            target_total: None,
            chunk_delay: interval,
            max_duration: Some(Duration::from_secs(duration)),
        },
        cancel.clone(),
    );
    let (rx, _worker) = spawn_stream(emitter, cancel.clone(), state.runtime.stream_buffer);
    debug!("✈️ flight stream opened over {region}: every {interval:?} for {duration}s");

    Ok(event_stream(rx, cancel.drop_guard(), keep_alive(&state), |event| match event {
        StreamEvent::Chunk(chunk) => Some(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "count": chunk.records.len(),
            "flights": chunk.records,
        })),
        StreamEvent::Complete(summary) => Some(json!({
            "status": "complete",
            "total": summary.total,
            "reason": summary.reason,
        })),
        StreamEvent::Failed { error, kind } => Some(failed(error, kind)),
    }))
}

fn keep_alive(state: &AppState) -> Duration {
    Duration::from_secs(state.runtime.keep_alive_secs.max(1))
}
