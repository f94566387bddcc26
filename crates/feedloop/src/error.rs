// ai
//! 💀 error.rs: the taxonomy of things going sideways.
//!
//! 🎬 *[a 429 walks into a bar. the bartender says "come back in five seconds."]*
//! *[the 429 comes back in one second. the bartender doubles the wait.]*
//!
//! Everywhere else in feedloop we are happy `anyhow` people. Down here in the core
//! we need to tell a rate limit from a revoked credential, because one gets a retry
//! and the other gets a funeral. So: a typed enum, courtesy of `thiserror`.
//!
//! 🧠 Knowledge graph:
//! - `Configuration` → fatal at startup, 400 over HTTP, never retried
//! - `Authentication` → fatal for the session, 401
//! - `TransientUpstream` → retried by `BatchFetcher` with backoff
//! - `FetchFailure` → what a transient error grows up into after the retries run out, 503
//! - `Upstream` / `Schema` → permanent, no retry, 502
//!
//! Cancellation is NOT in here. A consumer hanging up is a normal ending, not a tragedy. 🦆

use std::time::Duration;

use thiserror::Error;

/// 🏷️ Every way a feed can fail, sorted by who is to blame.
#[derive(Debug, Error)]
pub enum FeedError {
    /// 🔧 Bad knobs: empty dataset, out-of-range option, cursor pointing at nothing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 🔒 The token endpoint said no, or the upstream rejected our bearer.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// 🔄 Timeout, 429, 5xx, connection reset. Try again, slower.
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// 💀 We retried. We backed off. We retried again. The upstream did not care.
    #[error("fetch failed after {attempts} attempts: {last_error}")]
    FetchFailure {
        attempts: u32,
        #[source]
        last_error: Box<FeedError>,
    },

    /// 🚫 A 4xx that no amount of waiting will fix.
    #[error("upstream rejected the request with status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// 📦 The upstream answered, but not in any shape we recognise.
    #[error("malformed upstream payload: {0}")]
    Schema(String),
}

impl FeedError {
    /// 🔄 Is this worth another attempt?
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::TransientUpstream(_))
    }

    /// ⏱️ The canonical "it took too long" error. Counts as transient.
    pub fn timed_out(after: Duration) -> Self {
        FeedError::TransientUpstream(format!("upstream call timed out after {after:?}"))
    }

    /// 🏷️ Short machine-friendly label, used in terminal stream events and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Configuration(_) => "configuration",
            FeedError::Authentication(_) => "authentication",
            FeedError::TransientUpstream(_) => "transient_upstream",
            FeedError::FetchFailure { .. } => "fetch_failure",
            FeedError::Upstream { .. } => "upstream",
            FeedError::Schema(_) => "schema",
        }
    }

    /// 📡 Sort a reqwest failure into our buckets.
    ///
    /// Timeouts and connection trouble are transient. A body that won't decode is a schema
    /// problem. Everything else reqwest can throw at us we also treat as transient, because
    /// the network is the usual suspect.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::Schema(err.to_string())
        } else {
            FeedError::TransientUpstream(err.to_string())
        }
    }

    /// 🚦 Sort an HTTP status into our buckets. Only call this for non-success statuses.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => FeedError::Authentication(format!("upstream returned {status}: {body}")),
            408 | 429 => FeedError::TransientUpstream(format!("upstream returned {status}: {body}")),
            s if s >= 500 => FeedError::TransientUpstream(format!("upstream returned {status}: {body}")),
            s => FeedError::Upstream {
                status: s,
                message: body,
            },
        }
    }
}
