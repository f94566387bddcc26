// ai
//! 🌊 StreamWorker: the emitter's legs.
//!
//! Ticks a `ChunkedStreamEmitter` and pushes every result into a channel until the session
//! ends or nobody is listening anymore. It does not judge. It does not buffer more than the
//! channel allows. It does not outlive its consumer.
//!
//! 🦆 (the duck is subscribed to the stream. the duck never unsubscribes.)

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{StreamEvent, Worker};
use crate::emitter::{ChunkedStreamEmitter, Tick};
use crate::fetcher::Emitted;
use crate::upstreams::Upstream;

pub struct StreamWorker<U: Upstream> {
    emitter: ChunkedStreamEmitter<U>,
    tx: Sender<StreamEvent<Emitted<U>>>,
    /// 🛑 fired when the consumer goes away, so a pending rate-limit nap ends too
    cancel: CancellationToken,
}

impl<U: Upstream> StreamWorker<U> {
    pub fn new(
        emitter: ChunkedStreamEmitter<U>,
        tx: Sender<StreamEvent<Emitted<U>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { emitter, tx, cancel }
    }
}

impl<U: Upstream + 'static> Worker for StreamWorker<U> {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("🌊 StreamWorker started: {:?}", self.emitter);
            loop {
                let event = match self.emitter.tick().await {
                    Ok(Tick::Chunk(chunk)) => StreamEvent::Chunk(chunk),
                    Ok(Tick::Complete(summary)) => StreamEvent::Complete(summary),
                    Err(error) => {
                        warn!("💀 stream session failed: {error}");
                        StreamEvent::failed(&error)
                    }
                };
                let terminal = event.is_terminal();
                if self.tx.send(event).await.is_err() {
                    debug!("🚪 consumer hung up; cancelling the session");
                    self.cancel.cancel();
                    return Ok(());
                }
                if terminal {
                    debug!("🏁 StreamWorker: session over. Closing channel.");
                    self.tx.close();
                    return Ok(());
                }
            }
        })
    }
}

/// 🚀 Wire an emitter to a fresh bounded channel and start it.
///
/// The emitter must have been built with `cancel` (or a child of it) for hang-ups to reach
/// in-flight fetches.
pub fn spawn_stream<U: Upstream + 'static>(
    emitter: ChunkedStreamEmitter<U>,
    cancel: CancellationToken,
    capacity: usize,
) -> (Receiver<StreamEvent<Emitted<U>>>, JoinHandle<Result<()>>) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    let handle = StreamWorker::new(emitter, tx, cancel).start();
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{CompletionReason, EmitterConfig};
    use crate::error::FeedError;
    use crate::fetcher::BatchFetcher;
    use crate::fetcher::scripted::{ScriptedUpstream, Step};
    use crate::rate_control::{RateController, RatePolicy};
    use std::sync::Arc;
    use std::time::Duration;

    fn an_emitter(upstream: ScriptedUpstream, target: Option<u64>, cancel: &CancellationToken) -> ChunkedStreamEmitter<ScriptedUpstream> {
        let the_fetcher = BatchFetcher::new(
            upstream,
            Arc::new(RateController::new(RatePolicy::default())),
            Duration::from_secs(5),
        );
        ChunkedStreamEmitter::new(
            the_fetcher,
            EmitterConfig {
                chunk_size: 10,
                target_total: target,
                chunk_delay: Duration::from_millis(100),
                max_duration: None,
            },
            cancel.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_channel_carries_chunks_then_one_goodbye() -> anyhow::Result<()> {
        let the_token = CancellationToken::new();
        let (the_rx, the_handle) = spawn_stream(an_emitter(ScriptedUpstream::new([]), Some(25), &the_token), the_token, 2);

        let mut the_events = Vec::new();
        while let Ok(event) = the_rx.recv().await {
            the_events.push(event);
        }
        the_handle.await??;

        assert_eq!(the_events.len(), 4);
        assert!(matches!(
            the_events.last(),
            Some(StreamEvent::Complete(s)) if s.total == 25 && s.reason == CompletionReason::TargetReached
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_dropping_the_receiver_cancels_the_session() -> anyhow::Result<()> {
        let the_token = CancellationToken::new();
        let (the_rx, the_handle) = spawn_stream(an_emitter(ScriptedUpstream::new([]), None, &the_token), the_token.clone(), 1);

        let the_first = the_rx.recv().await?;
        assert!(matches!(the_first, StreamEvent::Chunk(_)));
        drop(the_rx);

        the_handle.await??;
        assert!(the_token.is_cancelled());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_failure_is_the_last_thing_on_the_wire() -> anyhow::Result<()> {
        let the_token = CancellationToken::new();
        let the_upstream = ScriptedUpstream::new([Step::Fail(FeedError::Schema("garbled".into()))]);
        let (the_rx, the_handle) = spawn_stream(an_emitter(the_upstream, Some(100), &the_token), the_token, 4);

        let the_event = the_rx.recv().await?;
        assert!(matches!(the_event, StreamEvent::Failed { kind: "schema", .. }));
        assert!(the_rx.recv().await.is_err(), "channel closes after the failure");
        the_handle.await??;
        Ok(())
    }
}
