// ai
//! 🚦 RateController: the bouncer at the upstream's door.
//!
//! 🎬 *[a polling loop approaches OpenSky for the third time in one second.]*
//! *["Five seconds," says the bouncer. "Between every request. I don't make the rules."]*
//! *[he does make the rules. he is the rules.]*
//!
//! 🧠 Knowledge graph:
//! - [`RateController::wait_if_needed`] reserves the next slot under a short lock, then sleeps
//!   until it without holding anything. Concurrent callers sharing a controller line up one
//!   `min_interval` apart instead of stampeding together.
//! - [`RateController::on_failure`] grows the backoff (initial, doubled, capped) and says when
//!   to give up. [`RateController::on_success`] forgives everything.
//! - Sleeping is tokio's clock, so `#[tokio::test(start_paused = true)]` sees every second
//!   without waiting for any of them. ⏱️
//! - A fired [`CancellationToken`] cuts the wait short: a disconnected client should not keep a
//!   task napping for a minute on its behalf.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// 📏 The pacing rules for one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// ⏱️ minimum gap between the completion of one call and the start of the next
    pub min_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 🔁 retries after the first failure before `on_failure` says give up
    pub max_retries: u32,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::ZERO,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// 🚥 What a wait ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Proceed,
    Cancelled,
}

/// 🔁 The verdict after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// 🩹 try again; the next `wait_if_needed` will include this much extra delay
    Retry(Duration),
    /// 💀 out of retries; `attempts` counts every failed call in the streak
    GiveUp { attempts: u32 },
}

#[derive(Debug, Default)]
struct Pacing {
    /// 📍 the most recent reserved slot or completion, whichever is later
    last_mark: Option<Instant>,
    backoff: Duration,
    consecutive_failures: u32,
}

/// 🚦 Spacing + exponential backoff for one upstream. Share it with `Arc` to pace a fleet.
#[derive(Debug)]
pub struct RateController {
    policy: RatePolicy,
    pacing: Mutex<Pacing>,
}

impl RateController {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            pacing: Mutex::new(Pacing::default()),
        }
    }

    pub fn policy(&self) -> &RatePolicy {
        &self.policy
    }

    /// ⏳ Suspend until this caller's slot comes up, or until `cancel` fires.
    pub async fn wait_if_needed(&self, cancel: &CancellationToken) -> Pace {
        let deadline = {
            let mut pacing = self.pacing.lock().await;
            let now = Instant::now();
            let earliest = pacing
                .last_mark
                .map_or(now, |last| (last + self.policy.min_interval).max(now));
            let deadline = earliest + pacing.backoff;
            pacing.last_mark = Some(deadline);
            deadline
        };

        let nap = deadline.saturating_duration_since(Instant::now());
        if nap.is_zero() {
            return if cancel.is_cancelled() { Pace::Cancelled } else { Pace::Proceed };
        }
        trace!("🚦 pacing: sleeping {:?} before the next upstream call", nap);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Pace::Cancelled,
            _ = sleep_until(deadline) => Pace::Proceed,
        }
    }

    /// ✅ The call worked. Clear the streak and the backoff.
    pub async fn on_success(&self) {
        let mut pacing = self.pacing.lock().await;
        pacing.consecutive_failures = 0;
        pacing.backoff = Duration::ZERO;
        Self::mark_completion(&mut pacing);
    }

    /// ❌ The call failed in a way worth retrying. Grow the backoff, or give up.
    pub async fn on_failure(&self) -> Backoff {
        let mut pacing = self.pacing.lock().await;
        Self::mark_completion(&mut pacing);
        pacing.consecutive_failures += 1;
        let attempts = pacing.consecutive_failures;

        if attempts > self.policy.max_retries {
            // 🧹 the streak ends with the give-up; the next fetch starts from a clean slate
            pacing.consecutive_failures = 0;
            pacing.backoff = Duration::ZERO;
            debug!("💀 {} consecutive failures: giving up", attempts);
            return Backoff::GiveUp { attempts };
        }

        let doublings = (attempts - 1).min(31);
        let backoff = self
            .policy
            .initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.policy.max_backoff);
        pacing.backoff = backoff;
        debug!("🩹 failure #{}: backing off {:?}", attempts, backoff);
        Backoff::Retry(backoff)
    }

    /// 🔢 Failures in the current streak.
    pub async fn consecutive_failures(&self) -> u32 {
        self.pacing.lock().await.consecutive_failures
    }

    // ⏱️ spacing is measured from completion, so a slow call still earns its full gap afterwards
    fn mark_completion(pacing: &mut Pacing) {
        let now = Instant::now();
        pacing.last_mark = Some(pacing.last_mark.map_or(now, |mark| mark.max(now)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy(min_interval_secs: u64) -> RatePolicy {
        RatePolicy {
            min_interval: Duration::from_secs(min_interval_secs),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_five_calls_take_at_least_four_intervals() {
        let the_bouncer = RateController::new(policy(2));
        let the_token = CancellationToken::new();
        let the_start = Instant::now();
        for _ in 0..5 {
            assert_eq!(the_bouncer.wait_if_needed(&the_token).await, Pace::Proceed);
            the_bouncer.on_success().await;
        }
        let the_elapsed = the_start.elapsed();
        assert!(the_elapsed >= Duration::from_secs(8), "took {the_elapsed:?}");
        assert!(the_elapsed < Duration::from_secs(9), "took {the_elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_backoff_doubles_until_it_hits_the_ceiling() {
        let the_bouncer = RateController::new(RatePolicy {
            max_retries: 10,
            ..policy(0)
        });
        let mut the_delays = Vec::new();
        for _ in 0..5 {
            match the_bouncer.on_failure().await {
                Backoff::Retry(d) => the_delays.push(d.as_secs()),
                Backoff::GiveUp { .. } => panic!("💀 gave up too early"),
            }
        }
        assert_eq!(the_delays, vec![1, 2, 4, 5, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_fourth_failure_is_the_last_straw() {
        let the_bouncer = RateController::new(policy(0));
        for _ in 0..3 {
            assert!(matches!(the_bouncer.on_failure().await, Backoff::Retry(_)));
        }
        assert_eq!(the_bouncer.on_failure().await, Backoff::GiveUp { attempts: 4 });
        // 🧹 clean slate after a give-up
        assert_eq!(the_bouncer.consecutive_failures().await, 0);
        assert_eq!(the_bouncer.on_failure().await, Backoff::Retry(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_backoff_is_added_to_the_wait_and_success_forgives_it() {
        let the_bouncer = RateController::new(policy(0));
        let the_token = CancellationToken::new();

        the_bouncer.wait_if_needed(&the_token).await;
        the_bouncer.on_failure().await;
        the_bouncer.on_failure().await;

        let the_start = Instant::now();
        the_bouncer.wait_if_needed(&the_token).await;
        assert_eq!(the_start.elapsed(), Duration::from_secs(2));

        the_bouncer.on_success().await;
        let the_start = Instant::now();
        the_bouncer.wait_if_needed(&the_token).await;
        assert_eq!(the_start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_cancellation_ends_the_nap_early() {
        let the_bouncer = RateController::new(policy(60));
        let the_token = CancellationToken::new();
        assert_eq!(the_bouncer.wait_if_needed(&the_token).await, Pace::Proceed);
        the_bouncer.on_success().await;

        let the_trigger = the_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            the_trigger.cancel();
        });

        let the_start = Instant::now();
        assert_eq!(the_bouncer.wait_if_needed(&the_token).await, Pace::Cancelled);
        assert!(the_start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_three_callers_share_one_bouncer_and_form_a_line() {
        let the_bouncer = Arc::new(RateController::new(policy(5)));
        let the_start = Instant::now();
        let the_callers = (0..3).map(|_| {
            let bouncer = Arc::clone(&the_bouncer);
            tokio::spawn(async move {
                bouncer.wait_if_needed(&CancellationToken::new()).await;
                the_start.elapsed()
            })
        });
        let mut the_arrivals: Vec<u64> = futures::future::join_all(the_callers)
            .await
            .into_iter()
            .map(|r| r.map(|d| d.as_secs()).unwrap_or(u64::MAX))
            .collect();
        the_arrivals.sort_unstable();
        assert_eq!(the_arrivals, vec![0, 5, 10]);
    }
}
