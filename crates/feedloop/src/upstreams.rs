// ai
//! 🔌 Upstreams: where the records come from before they become a stream.
//!
//! 🚰 An upstream hands over a window of stored records. It does not pace itself, it does
//! not retry, it does not stamp. `BatchFetcher` does all three around it.
//!
//! 🎭 The casting call:
//! - [`LocalUpstream`]: an in-memory dataset and a cursor (transcripts, flight replays)
//! - [`OpenSkyUpstream`]: live aircraft over a region
//! - [`TranscriptApiUpstream`]: another transcript server's polling endpoint
//!
//! [`TranscriptUpstream`] and [`FlightUpstream`] are the enums the feeds dispatch through,
//! so a session never needs to know whether its planes are real. 🦆

use async_trait::async_trait;

use crate::dataset::Cursor;
use crate::error::FeedError;
use crate::records::{FlightState, Record, Utterance};

pub mod common_config;
pub mod local;
pub mod opensky;
pub mod transcript_api;

pub use common_config::CommonUpstreamConfig;
pub use local::LocalUpstream;
pub use opensky::{OpenSkyClient, OpenSkyConfig, OpenSkyUpstream, Region};
pub use transcript_api::{TranscriptApiConfig, TranscriptApiUpstream};

/// 🚰 A source of stored records, one window at a time.
///
/// # Contract
/// - `pull(w)` returns at most `w` records, in upstream order. An empty result from a
///   finite source means it is done.
/// - Errors come back classified (`FeedError`), so the caller can tell a retry from a funeral.
/// - `cursor` exposes a resumable position when the upstream has one.
#[async_trait]
pub trait Upstream: std::fmt::Debug + Send {
    type Record: Record;

    async fn pull(&mut self, window: usize) -> Result<Vec<Self::Record>, FeedError>;

    fn cursor(&self) -> Option<Cursor> {
        None
    }

    /// 🌵 Does an empty pull mean "done" (true) or just "nothing right now" (false)?
    fn is_finite(&self) -> bool {
        false
    }

    /// 🏷️ One line for the logs.
    fn describe(&self) -> String;
}

/// 🎧 Transcript sources.
#[derive(Debug)]
pub enum TranscriptUpstream {
    Local(LocalUpstream<Utterance>),
    Api(TranscriptApiUpstream),
}

#[async_trait]
impl Upstream for TranscriptUpstream {
    type Record = Utterance;

    async fn pull(&mut self, window: usize) -> Result<Vec<Utterance>, FeedError> {
        match self {
            TranscriptUpstream::Local(u) => u.pull(window).await,
            TranscriptUpstream::Api(u) => u.pull(window).await,
        }
    }

    fn cursor(&self) -> Option<Cursor> {
        match self {
            TranscriptUpstream::Local(u) => u.cursor(),
            TranscriptUpstream::Api(u) => u.cursor(),
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            TranscriptUpstream::Local(u) => u.is_finite(),
            TranscriptUpstream::Api(u) => u.is_finite(),
        }
    }

    fn describe(&self) -> String {
        match self {
            TranscriptUpstream::Local(u) => u.describe(),
            TranscriptUpstream::Api(u) => u.describe(),
        }
    }
}

/// ✈️ Flight sources.
#[derive(Debug)]
pub enum FlightUpstream {
    OpenSky(OpenSkyUpstream),
    Replay(LocalUpstream<FlightState>),
}

#[async_trait]
impl Upstream for FlightUpstream {
    type Record = FlightState;

    async fn pull(&mut self, window: usize) -> Result<Vec<FlightState>, FeedError> {
        match self {
            FlightUpstream::OpenSky(u) => u.pull(window).await,
            FlightUpstream::Replay(u) => u.pull(window).await,
        }
    }

    fn cursor(&self) -> Option<Cursor> {
        match self {
            FlightUpstream::OpenSky(u) => u.cursor(),
            FlightUpstream::Replay(u) => u.cursor(),
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            FlightUpstream::OpenSky(u) => u.is_finite(),
            FlightUpstream::Replay(u) => u.is_finite(),
        }
    }

    fn describe(&self) -> String {
        match self {
            FlightUpstream::OpenSky(u) => u.describe(),
            FlightUpstream::Replay(u) => u.describe(),
        }
    }
}
