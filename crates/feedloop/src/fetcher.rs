// ai
//! 📥 BatchFetcher: pace, pull, retry, stamp. In that order. Every time.
//!
//! 🎬 *[the upstream returns 503. the fetcher sighs, waits one second, and asks again.]*
//! *[503. two seconds. 503. four seconds. 200.]*
//! *[the fetcher stamps every record with the current time and pretends nothing happened.]*
//!
//! 🧠 Knowledge graph:
//! - Wraps one [`Upstream`] and a shared [`RateController`].
//! - Each attempt: `wait_if_needed` → `pull` under a per-call timeout → classify.
//! - Transient (timeout, 429, 5xx, connection) → `on_failure`, retry; out of retries →
//!   `FetchFailure { attempts, last_error }`.
//! - Anything else → straight back to the caller, no retry, no backoff.
//! - Success → `on_success`, then every record gets the same `Utc::now()` stamp.
//! - Cancellation while waiting or mid-pull is [`FetchOutcome::Cancelled`], not an error. 🦆

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::FeedError;
use crate::rate_control::{Backoff, Pace, RateController};
use crate::records::Record;
use crate::upstreams::Upstream;

/// 📡 The stamped form of whatever `U` stores.
pub type Emitted<U> = <<U as Upstream>::Record as Record>::Emitted;

/// 📦 What a fetch produced.
#[derive(Debug)]
pub enum FetchOutcome<E> {
    Records(Vec<E>),
    /// 🛑 the session was cancelled before the records arrived
    Cancelled,
}

#[derive(Debug)]
pub struct BatchFetcher<U> {
    upstream: U,
    rate: Arc<RateController>,
    call_timeout: Duration,
}

impl<U: Upstream> BatchFetcher<U> {
    pub fn new(upstream: U, rate: Arc<RateController>, call_timeout: Duration) -> Self {
        Self {
            upstream,
            rate,
            call_timeout,
        }
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// 📥 Fetch up to `window` records, stamped at the moment of return.
    pub async fn fetch(
        &mut self,
        window: usize,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome<Emitted<U>>, FeedError> {
        loop {
            if self.rate.wait_if_needed(cancel).await == Pace::Cancelled {
                return Ok(FetchOutcome::Cancelled);
            }

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(FetchOutcome::Cancelled),
                pulled = tokio::time::timeout(self.call_timeout, self.upstream.pull(window)) => pulled,
            };

            let error = match attempt {
                Ok(Ok(records)) => {
                    self.rate.on_success().await;
                    let now = Utc::now();
                    trace!("📥 {} records from {}", records.len(), self.upstream.describe());
                    return Ok(FetchOutcome::Records(
                        records.into_iter().map(|r| r.stamp(now)).collect(),
                    ));
                }
                Ok(Err(error)) => error,
                Err(_elapsed) => FeedError::timed_out(self.call_timeout),
            };

            if !error.is_transient() {
                return Err(error);
            }

            match self.rate.on_failure().await {
                Backoff::Retry(delay) => {
                    warn!("🩹 {} hiccuped ({error}); retrying in {:?}", self.upstream.describe(), delay);
                }
                Backoff::GiveUp { attempts } => {
                    return Err(FeedError::FetchFailure {
                        attempts,
                        last_error: Box::new(error),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    //! 🎭 An upstream that follows a script, for tests that need failures on cue.

    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::error::FeedError;
    use crate::records::{Utterance, fixtures};
    use crate::upstreams::Upstream;

    #[derive(Debug)]
    pub(crate) enum Step {
        /// 📦 hand over this many records (or the window, if smaller)
        Give(usize),
        Fail(FeedError),
        /// 😴 never answer
        Hang,
    }

    /// 🎭 Plays `steps` in order, then hands out full windows forever.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedUpstream {
        pub(crate) steps: VecDeque<Step>,
        pub(crate) calls: Arc<AtomicU32>,
        next_id: u32,
    }

    impl ScriptedUpstream {
        pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: steps.into_iter().collect(),
                ..Self::default()
            }
        }

        fn give(&mut self, n: usize) -> Vec<Utterance> {
            (0..n)
                .map(|_| {
                    self.next_id += 1;
                    fixtures::utterance("conv_scripted", self.next_id - 1)
                })
                .collect()
        }
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        type Record = Utterance;

        async fn pull(&mut self, window: usize) -> Result<Vec<Utterance>, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.steps.pop_front() {
                Some(Step::Give(n)) => Ok(self.give(n.min(window))),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Hang) => std::future::pending().await,
                None => Ok(self.give(window)),
            }
        }

        fn describe(&self) -> String {
            "scripted upstream".to_string()
        }
    }
}
