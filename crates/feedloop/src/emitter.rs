// ai
//! 🌊 ChunkedStreamEmitter: turns a fetcher into a paced sequence of chunks.
//!
//! 🎬 *[chunk 1: 100 utterances. a pause. chunk 2: 100 utterances. a pause.]*
//! *[chunk 100: 100 utterances. "complete", says the emitter. 10,000 exactly. not 10,001.]*
//!
//! 🧠 Knowledge graph, a.k.a. the state machine:
//!
//! ```text
//!   Idle ──start──▶ Streaming ──tick──▶ Streaming
//!                       │
//!                       ├── target reached / cancelled / max_duration / source dry ──▶ Complete
//!                       └── unrecoverable fetch error ──────────────────────────────▶ Failed
//! ```
//!
//! - A tick fetches `min(chunk_size, remaining)`, so the last chunk is short and the total
//!   is exact. `T` records in chunks of `C` is `ceil(T / C)` chunks.
//! - `chunk_delay` is paid at the start of every tick after the first, so completion never
//!   waits on a pointless final nap.
//! - Strictly sequential. One emitter per session. Sessions share nothing mutable. 🦆

use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::FeedError;
use crate::fetcher::{BatchFetcher, Emitted, FetchOutcome};
use crate::upstreams::Upstream;

/// 🎛️ Shape of one stream session.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterConfig {
    pub chunk_size: usize,
    /// 🎯 stop after exactly this many records; `None` streams until something else stops it
    pub target_total: Option<u64>,
    pub chunk_delay: Duration,
    pub max_duration: Option<Duration>,
}

/// 🏁 Why a stream ended, in the words the consumer will see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    TargetReached,
    Cancelled,
    DurationElapsed,
    SourceExhausted,
}

/// 📊 How far along we are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub emitted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

/// ⚡ Running numbers for the throughput-curious.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkStats {
    pub total_sent: u64,
    pub elapsed_seconds: f64,
    /// 📈 records per second since the session started
    pub throughput: f64,
}

/// 📦 One emitted chunk.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk<E> {
    pub chunk_number: u64,
    pub records: Vec<E>,
    pub progress: Progress,
    pub stats: ChunkStats,
}

/// 🏁 The last word on a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub total: u64,
    pub elapsed_seconds: f64,
    pub throughput: f64,
    pub reason: CompletionReason,
}

/// 🎞️ What a tick produced.
#[derive(Debug)]
pub enum Tick<E> {
    Chunk(Chunk<E>),
    Complete(StreamSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmitterState {
    Idle,
    Streaming,
    Complete(StreamSummary),
    Failed,
}

/// 🧾 Per-session bookkeeping. Born at start, gone when the emitter is dropped.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub target_total: Option<u64>,
    pub emitted_count: u64,
    pub chunks_emitted: u64,
    pub started_at: Instant,
    pub max_duration: Option<Duration>,
}

impl StreamSession {
    fn deadline(&self) -> Option<Instant> {
        self.max_duration.map(|d| self.started_at + d)
    }

    fn remaining(&self) -> Option<u64> {
        self.target_total.map(|t| t.saturating_sub(self.emitted_count))
    }

    fn stats(&self) -> ChunkStats {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        ChunkStats {
            total_sent: self.emitted_count,
            elapsed_seconds: round2(elapsed),
            throughput: round2(throughput(self.emitted_count, elapsed)),
        }
    }
}

pub struct ChunkedStreamEmitter<U: Upstream> {
    fetcher: BatchFetcher<U>,
    config: EmitterConfig,
    cancel: CancellationToken,
    state: EmitterState,
    session: Option<StreamSession>,
    /// 🌵 a finite source that returns nothing is done; a live one just had a quiet moment
    finite_source: bool,
}

impl<U: Upstream> std::fmt::Debug for ChunkedStreamEmitter<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedStreamEmitter")
            .field("upstream", &self.fetcher.upstream().describe())
            .field("config", &self.config)
            .field("state", &self.state)
            .field("session", &self.session)
            .finish()
    }
}

impl<U: Upstream> ChunkedStreamEmitter<U> {
    pub fn new(fetcher: BatchFetcher<U>, config: EmitterConfig, cancel: CancellationToken) -> Self {
        let finite_source = fetcher.upstream().is_finite();
        Self {
            fetcher,
            config: EmitterConfig {
                chunk_size: config.chunk_size.max(1),
                ..config
            },
            cancel,
            state: EmitterState::Idle,
            session: None,
            finite_source,
        }
    }

    pub fn state(&self) -> &EmitterState {
        &self.state
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub fn upstream(&self) -> &U {
        self.fetcher.upstream()
    }

    /// ▶️ Idle → Streaming. Calling it twice is harmless.
    pub fn start(&mut self) {
        if self.state == EmitterState::Idle {
            info!(
                "🌊 stream starting from {} (chunk {}, target {:?})",
                self.fetcher.upstream().describe(),
                self.config.chunk_size,
                self.config.target_total
            );
            self.session = Some(StreamSession {
                target_total: self.config.target_total,
                emitted_count: 0,
                chunks_emitted: 0,
                started_at: Instant::now(),
                max_duration: self.config.max_duration,
            });
            self.state = EmitterState::Streaming;
        }
    }

    /// 🎞️ Produce the next chunk, or the completion summary.
    ///
    /// After completion every tick returns the same summary. After a failure every tick
    /// returns a configuration error: a failed session is not restarted in place.
    pub async fn tick(&mut self) -> Result<Tick<Emitted<U>>, FeedError> {
        if self.state == EmitterState::Idle {
            self.start();
        }
        match &self.state {
            EmitterState::Complete(summary) => return Ok(Tick::Complete(summary.clone())),
            EmitterState::Failed => {
                return Err(FeedError::Configuration("stream session already failed".to_string()));
            }
            EmitterState::Idle | EmitterState::Streaming => {}
        }
        let Some(session) = self.session.clone() else {
            return Err(FeedError::Configuration("stream session missing".to_string()));
        };

        if session.remaining() == Some(0) {
            return Ok(self.complete(CompletionReason::TargetReached));
        }
        if self.cancel.is_cancelled() {
            return Ok(self.complete(CompletionReason::Cancelled));
        }
        let deadline = session.deadline();
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(self.complete(CompletionReason::DurationElapsed));
        }

        if session.chunks_emitted > 0 && !self.config.chunk_delay.is_zero() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(self.complete(CompletionReason::Cancelled)),
                _ = until(deadline) => return Ok(self.complete(CompletionReason::DurationElapsed)),
                _ = sleep(self.config.chunk_delay) => {}
            }
        }

        let window = match session.remaining() {
            Some(remaining) => (remaining as usize).min(self.config.chunk_size),
            None => self.config.chunk_size,
        };

        let fetched = tokio::select! {
            biased;
            _ = until(deadline) => return Ok(self.complete(CompletionReason::DurationElapsed)),
            fetched = self.fetcher.fetch(window, &self.cancel) => fetched,
        };

        let records = match fetched {
            Ok(FetchOutcome::Records(records)) => records,
            Ok(FetchOutcome::Cancelled) => return Ok(self.complete(CompletionReason::Cancelled)),
            Err(error) => {
                info!("💀 stream failed after {} records: {error}", session.emitted_count);
                self.state = EmitterState::Failed;
                return Err(error);
            }
        };

        if records.is_empty() && self.finite_source {
            return Ok(self.complete(CompletionReason::SourceExhausted));
        }

        let Some(session) = self.session.as_mut() else {
            return Err(FeedError::Configuration("stream session missing".to_string()));
        };
        session.emitted_count += records.len() as u64;
        session.chunks_emitted += 1;
        let progress = Progress {
            emitted: session.emitted_count,
            target: session.target_total,
            percent: session
                .target_total
                .filter(|t| *t > 0)
                .map(|t| round2(session.emitted_count as f64 / t as f64 * 100.0)),
        };
        debug!(
            "📦 chunk #{}: {} records ({} total)",
            session.chunks_emitted,
            records.len(),
            session.emitted_count
        );
        Ok(Tick::Chunk(Chunk {
            chunk_number: session.chunks_emitted,
            records,
            progress,
            stats: session.stats(),
        }))
    }

    fn complete(&mut self, reason: CompletionReason) -> Tick<Emitted<U>> {
        let (total, elapsed) = self
            .session
            .as_ref()
            .map(|s| (s.emitted_count, s.started_at.elapsed().as_secs_f64()))
            .unwrap_or_default();
        let summary = StreamSummary {
            total,
            elapsed_seconds: round2(elapsed),
            throughput: round2(throughput(total, elapsed)),
            reason,
        };
        info!(
            "🏁 stream complete ({:?}): {} records in {:.2}s ({:.0} records/s)",
            reason, summary.total, summary.elapsed_seconds, summary.throughput
        );
        self.state = EmitterState::Complete(summary.clone());
        Tick::Complete(summary)
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn throughput(records: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        records as f64 / elapsed_secs
    } else {
        0.0
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::fetcher::scripted::{ScriptedUpstream, Step};
    use crate::rate_control::{RateController, RatePolicy};
    use crate::records::fixtures;
    use crate::upstreams::LocalUpstream;
    use std::sync::Arc;

    fn quick_rate() -> Arc<RateController> {
        Arc::new(RateController::new(RatePolicy {
            min_interval: Duration::ZERO,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            max_retries: 1,
        }))
    }

    fn an_emitter<U: Upstream>(upstream: U, config: EmitterConfig) -> (ChunkedStreamEmitter<U>, CancellationToken) {
        let the_token = CancellationToken::new();
        let the_fetcher = BatchFetcher::new(upstream, quick_rate(), Duration::from_secs(5));
        (ChunkedStreamEmitter::new(the_fetcher, config, the_token.clone()), the_token)
    }

    fn bounded(chunk_size: usize, target: u64) -> EmitterConfig {
        EmitterConfig {
            chunk_size,
            target_total: Some(target),
            chunk_delay: Duration::from_millis(10),
            max_duration: None,
        }
    }

    async fn drain<U: Upstream>(emitter: &mut ChunkedStreamEmitter<U>) -> anyhow::Result<(Vec<usize>, StreamSummary)> {
        let mut sizes = Vec::new();
        loop {
            match emitter.tick().await? {
                Tick::Chunk(chunk) => sizes.push(chunk.records.len()),
                Tick::Complete(summary) => return Ok((sizes, summary)),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_ten_thousand_means_ten_thousand() -> anyhow::Result<()> {
        for (the_target, the_chunk) in [(10_000u64, 100usize), (250, 100), (7, 3), (5, 10)] {
            let (mut the_emitter, _) = an_emitter(ScriptedUpstream::new([]), bounded(the_chunk, the_target));
            let (the_sizes, the_summary) = drain(&mut the_emitter).await?;
            assert_eq!(the_sizes.len() as u64, the_target.div_ceil(the_chunk as u64));
            assert_eq!(the_sizes.iter().sum::<usize>() as u64, the_target);
            assert_eq!(the_summary.total, the_target);
            assert_eq!(the_summary.reason, CompletionReason::TargetReached);
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_progress_counts_up_to_one_hundred_percent() -> anyhow::Result<()> {
        let (mut the_emitter, _) = an_emitter(ScriptedUpstream::new([]), bounded(4, 10));
        let mut the_marks = Vec::new();
        while let Tick::Chunk(chunk) = the_emitter.tick().await? {
            the_marks.push((chunk.chunk_number, chunk.progress.emitted, chunk.progress.percent));
        }
        assert_eq!(
            the_marks,
            vec![(1, 4, Some(40.0)), (2, 8, Some(80.0)), (3, 10, Some(100.0))]
        );
        assert!(matches!(the_emitter.state(), EmitterState::Complete(_)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_delay_sits_between_chunks_not_after_the_last() -> anyhow::Result<()> {
        let (mut the_emitter, _) = an_emitter(
            ScriptedUpstream::new([]),
            EmitterConfig {
                chunk_delay: Duration::from_secs(1),
                ..bounded(10, 30)
            },
        );
        let the_start = Instant::now();
        drain(&mut the_emitter).await?;
        assert_eq!(the_start.elapsed(), Duration::from_secs(2));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_an_unbounded_stream_stops_when_someone_hangs_up() -> anyhow::Result<()> {
        let (mut the_emitter, the_token) = an_emitter(
            ScriptedUpstream::new([]),
            EmitterConfig {
                target_total: None,
                ..bounded(50, 0)
            },
        );
        for _ in 0..3 {
            assert!(matches!(the_emitter.tick().await?, Tick::Chunk(ref c) if c.progress.target.is_none()));
        }
        the_token.cancel();
        match the_emitter.tick().await? {
            Tick::Complete(summary) => {
                assert_eq!(summary.reason, CompletionReason::Cancelled);
                assert_eq!(summary.total, 150);
            }
            Tick::Chunk(_) => panic!("💀 kept streaming after cancellation"),
        }
        // 🧪 and it stays complete
        assert!(matches!(the_emitter.tick().await?, Tick::Complete(_)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_max_duration_cuts_the_show_short() -> anyhow::Result<()> {
        let (mut the_emitter, _) = an_emitter(
            ScriptedUpstream::new([]),
            EmitterConfig {
                chunk_size: 1,
                target_total: None,
                chunk_delay: Duration::from_secs(10),
                max_duration: Some(Duration::from_secs(25)),
            },
        );
        let (the_sizes, the_summary) = drain(&mut the_emitter).await?;
        assert_eq!(the_sizes.len(), 3, "chunks at 0s, 10s, 20s");
        assert_eq!(the_summary.reason, CompletionReason::DurationElapsed);
        assert_eq!(the_summary.elapsed_seconds, 25.0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_non_looping_dataset_runs_dry_gracefully() -> anyhow::Result<()> {
        let the_dataset = Dataset::new(fixtures::conversations(&[3, 4]))?;
        let (mut the_emitter, _) = an_emitter(LocalUpstream::new(the_dataset, false), bounded(5, 100));
        let (the_sizes, the_summary) = drain(&mut the_emitter).await?;
        assert_eq!(the_sizes, vec![5, 2]);
        assert_eq!(the_summary.reason, CompletionReason::SourceExhausted);
        assert_eq!(the_summary.total, 7);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_permanent_failure_fails_the_session() {
        let (mut the_emitter, _) = an_emitter(
            ScriptedUpstream::new([Step::Give(5), Step::Fail(FeedError::Authentication("revoked".into()))]),
            bounded(5, 100),
        );
        assert!(matches!(the_emitter.tick().await, Ok(Tick::Chunk(_))));
        assert!(matches!(the_emitter.tick().await, Err(FeedError::Authentication(_))));
        assert_eq!(the_emitter.state(), &EmitterState::Failed);
        assert!(the_emitter.tick().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_looping_dataset_streams_past_its_own_end() -> anyhow::Result<()> {
        let the_dataset = Dataset::new(fixtures::conversations(&[2, 3, 1]))?;
        let (mut the_emitter, _) = an_emitter(LocalUpstream::new(the_dataset, true), bounded(4, 20));
        let (the_sizes, the_summary) = drain(&mut the_emitter).await?;
        assert_eq!(the_sizes, vec![4, 4, 4, 4, 4]);
        assert_eq!(the_summary.total, 20);
        assert_eq!(the_emitter.upstream().cursor().map(|c| c.loop_count), Some(3));
        Ok(())
    }
}
