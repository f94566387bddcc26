// ai
//! 🏗️ Feeds: the composition root. Where datasets, clients and rate controllers are born,
//! wired together once, and handed to whoever needs a stream.
//!
//! 🎬 *[the process starts. a dataset loads. an OpenSky client wakes up and checks its
//! keyring. nobody reaches for a global. the duck nods approvingly.]*
//!
//! 🧠 Knowledge graph:
//! - [`TranscriptFeed`]: the loaded transcript [`Dataset`], the "house feed" behind
//!   `GET /transcript/utterances` (one long-lived cursor, behind an async mutex), and a
//!   factory for fresh, independent stream sessions.
//! - [`FlightFeed`]: either a live OpenSky client (with ONE rate controller shared by every
//!   session, so the upstream's five-second rule holds globally) or a replay dataset.
//! - [`Feeds`]: both of the above, built from [`AppConfig`], shared via `Arc`.
//!
//! Configuration types live here, next to the things they configure. 🦆

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_config::AppConfig;
use crate::dataset::local_file::LocalFileConfig;
use crate::dataset::synthetic::SyntheticConfig;
use crate::dataset::{self, Cursor, Dataset, TranscriptDatasetConfig};
use crate::emitter::{ChunkedStreamEmitter, EmitterConfig};
use crate::error::FeedError;
use crate::fetcher::{BatchFetcher, FetchOutcome};
use crate::rate_control::{Backoff, Pace, RateController};
use crate::records::{FlightRecord, FlightState, TranscriptRecord, Utterance};
use crate::upstreams::{
    CommonUpstreamConfig, FlightUpstream, LocalUpstream, OpenSkyClient, OpenSkyConfig, OpenSkyUpstream, Region,
    TranscriptUpstream, Upstream,
};

// ============================================================
//  🎛️ Config
// ============================================================

fn default_true() -> bool {
    true
}

/// 🎧 How the transcript feed finds and walks its dataset.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TranscriptConfig {
    #[serde(default)]
    pub dataset: TranscriptDatasetConfig,
    /// 🎭 generate synthetic conversations when the configured dataset can't be loaded
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default)]
    pub fallback: SyntheticConfig,
    /// 🔁 wrap around at the end of the dataset; off means streams end when it runs out
    #[serde(default = "default_true")]
    pub loop_enabled: bool,
    #[serde(default)]
    pub pacing: CommonUpstreamConfig,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            dataset: TranscriptDatasetConfig::default(),
            fallback_enabled: true,
            fallback: SyntheticConfig::default(),
            loop_enabled: true,
            pacing: CommonUpstreamConfig::default(),
        }
    }
}

/// 📼 A recorded flight dataset, replayed instead of asking the sky.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FlightReplayConfig {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub loop_enabled: bool,
    #[serde(default)]
    pub pacing: CommonUpstreamConfig,
}

/// ✈️ Live or recorded. Externally tagged: `[flight.source.OpenSky]` / `[flight.source.Replay]`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum FlightSourceConfig {
    OpenSky(OpenSkyConfig),
    Replay(FlightReplayConfig),
}

impl Default for FlightSourceConfig {
    fn default() -> Self {
        FlightSourceConfig::OpenSky(OpenSkyConfig::default())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FlightConfig {
    #[serde(default)]
    pub source: FlightSourceConfig,
    /// 🔢 cap on state vectors per stream poll; a busy sky has ~10k aircraft in it
    #[serde(default = "default_max_flights")]
    pub max_flights: usize,
}

fn default_max_flights() -> usize {
    10_000
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            source: FlightSourceConfig::default(),
            max_flights: default_max_flights(),
        }
    }
}

// ============================================================
//  🩺 Status
// ============================================================

/// 🩺 What `/…/status` reports about a feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStatus {
    pub name: &'static str,
    pub available: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_available: Option<usize>,
}

// ============================================================
//  🎧 Transcript feed
// ============================================================

/// 🎧 The transcript dataset and everything that streams from it.
#[derive(Debug)]
pub struct TranscriptFeed {
    dataset: Dataset<Utterance>,
    loop_enabled: bool,
    pacing: CommonUpstreamConfig,
    /// 🏠 the polling endpoint's one long walk through the dataset
    house: Mutex<BatchFetcher<LocalUpstream<Utterance>>>,
}

impl TranscriptFeed {
    pub fn new(dataset: Dataset<Utterance>, config: &TranscriptConfig) -> Self {
        // 🏠 the house feed loops regardless of `loop_enabled`; a poller never sees "the end"
        let house = BatchFetcher::new(
            LocalUpstream::new(dataset.clone(), true),
            Arc::new(RateController::new(config.pacing.rate_policy())),
            config.pacing.request_timeout(),
        );
        Self {
            dataset,
            loop_enabled: config.loop_enabled,
            pacing: config.pacing.clone(),
            house: Mutex::new(house),
        }
    }

    /// 📥 Load the configured dataset (falling back to synthetic if allowed) and wrap it.
    pub async fn from_config(config: &TranscriptConfig) -> Result<Self, FeedError> {
        let fallback = config.fallback_enabled.then_some(&config.fallback);
        let dataset = dataset::load_transcripts(&config.dataset, fallback).await?;
        Ok(Self::new(dataset, config))
    }

    pub fn dataset(&self) -> &Dataset<Utterance> {
        &self.dataset
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            name: "transcript",
            available: true,
            message: format!(
                "{} utterances across {} conversations loaded",
                self.dataset.len(),
                self.dataset.conversation_count()
            ),
            records_available: Some(self.dataset.len()),
        }
    }

    /// 🏠 Next `limit` utterances from the house feed. Successive calls continue where the
    /// previous one stopped, wrapping at the end of the dataset.
    pub async fn poll(&self, limit: usize) -> Result<Vec<TranscriptRecord>, FeedError> {
        let mut house = self.house.lock().await;
        match house.fetch(limit, &CancellationToken::new()).await? {
            FetchOutcome::Records(records) => Ok(records),
            FetchOutcome::Cancelled => Ok(Vec::new()),
        }
    }

    /// 📍 Where the house feed will read next.
    pub async fn house_cursor(&self) -> Option<Cursor> {
        self.house.lock().await.upstream().cursor()
    }

    /// 🌊 A fresh stream session with its own cursor (resumed from `start` when given) and
    /// its own rate controller.
    pub fn session(
        &self,
        start: Option<Cursor>,
        config: EmitterConfig,
        cancel: CancellationToken,
    ) -> Result<ChunkedStreamEmitter<TranscriptUpstream>, FeedError> {
        let upstream = match start {
            Some(cursor) => LocalUpstream::resume(self.dataset.clone(), cursor, self.loop_enabled)?,
            None => LocalUpstream::new(self.dataset.clone(), self.loop_enabled),
        };
        let fetcher = BatchFetcher::new(
            TranscriptUpstream::Local(upstream),
            Arc::new(RateController::new(self.pacing.rate_policy())),
            self.pacing.request_timeout(),
        );
        Ok(ChunkedStreamEmitter::new(fetcher, config, cancel))
    }
}

// ============================================================
//  ✈️ Flight feed
// ============================================================

#[derive(Debug)]
enum FlightSource {
    Live {
        client: Arc<OpenSkyClient>,
        default_region: Region,
    },
    Replay {
        dataset: Dataset<FlightState>,
        loop_enabled: bool,
        /// 🏠 `/opensky/flights` walks the replay the way the transcript house feed does
        house: Mutex<BatchFetcher<LocalUpstream<FlightState>>>,
    },
}

/// ✈️ The flight feed: real planes or recorded ones.
#[derive(Debug)]
pub struct FlightFeed {
    source: FlightSource,
    /// 🚦 shared by every live session; the upstream counts all our requests, not per tab
    rate: Arc<RateController>,
    pacing: CommonUpstreamConfig,
    max_flights: usize,
}

impl FlightFeed {
    /// 🛰️ A live feed over a ready-made client.
    pub fn live(client: Arc<OpenSkyClient>, config: &OpenSkyConfig, max_flights: usize) -> Self {
        Self {
            source: FlightSource::Live {
                client,
                default_region: config.region,
            },
            rate: Arc::new(RateController::new(config.pacing.rate_policy())),
            pacing: config.pacing.clone(),
            max_flights,
        }
    }

    /// 📼 A replay feed over an already-loaded dataset.
    pub fn replay(dataset: Dataset<FlightState>, config: &FlightReplayConfig, max_flights: usize) -> Self {
        let rate = Arc::new(RateController::new(config.pacing.rate_policy()));
        let house = BatchFetcher::new(
            LocalUpstream::new(dataset.clone(), true),
            Arc::clone(&rate),
            config.pacing.request_timeout(),
        );
        Self {
            source: FlightSource::Replay {
                dataset,
                loop_enabled: config.loop_enabled,
                house: Mutex::new(house),
            },
            rate,
            pacing: config.pacing.clone(),
            max_flights,
        }
    }

    pub async fn from_config(config: &FlightConfig) -> Result<Self, FeedError> {
        match &config.source {
            FlightSourceConfig::OpenSky(c) => {
                let client = Arc::new(OpenSkyClient::new(c)?);
                Ok(Self::live(client, c, config.max_flights))
            }
            FlightSourceConfig::Replay(c) => {
                let dataset = dataset::load_flights(&LocalFileConfig { path: c.path.clone() }).await?;
                Ok(Self::replay(dataset, c, config.max_flights))
            }
        }
    }

    pub fn max_flights(&self) -> usize {
        self.max_flights
    }

    /// 📸 How many state vectors one stream poll should ask for. A replay never hands out
    /// more than one pass per poll, so the same aircraft doesn't appear twice in a snapshot.
    pub fn snapshot_size(&self) -> usize {
        match &self.source {
            FlightSource::Live { .. } => self.max_flights,
            FlightSource::Replay { dataset, .. } => self.max_flights.min(dataset.len()),
        }
    }

    pub fn default_region(&self) -> Region {
        match &self.source {
            FlightSource::Live { default_region, .. } => *default_region,
            FlightSource::Replay { .. } => Region::default(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        match &self.source {
            FlightSource::Live { client, .. } => client.is_authenticated(),
            FlightSource::Replay { .. } => false,
        }
    }

    /// 🩺 Live: a paced probe of the upstream. Replay: always up, with a record count.
    pub async fn status(&self) -> FeedStatus {
        match &self.source {
            FlightSource::Live { client, .. } => {
                // 🚦 probes count against the upstream's budget and feed its backoff too
                let probed = match self.rate.wait_if_needed(&CancellationToken::new()).await {
                    Pace::Proceed => client.probe().await,
                    Pace::Cancelled => Err(FeedError::TransientUpstream("status probe cancelled".into())),
                };
                match &probed {
                    Ok(()) => self.rate.on_success().await,
                    Err(e) if e.is_transient() => {
                        if let Backoff::Retry(delay) = self.rate.on_failure().await {
                            warn!("🩹 OpenSky status probe failed ({e}); next call backs off {:?}", delay);
                        }
                    }
                    Err(_) => {}
                }
                let access = if client.is_authenticated() {
                    "authenticated"
                } else {
                    "anonymous"
                };
                match probed {
                    Ok(()) => FeedStatus {
                        name: "opensky",
                        available: true,
                        message: format!("OpenSky API is reachable ({access} access)"),
                        records_available: None,
                    },
                    Err(e) => FeedStatus {
                        name: "opensky",
                        available: false,
                        message: format!("OpenSky API is not reachable: {e}"),
                        records_available: None,
                    },
                }
            }
            FlightSource::Replay { dataset, .. } => FeedStatus {
                name: "opensky",
                available: true,
                message: format!("replaying {} recorded state vectors", dataset.len()),
                records_available: Some(dataset.len()),
            },
        }
    }

    /// 📸 Up to `limit` current flights over `region` (replays ignore the region and
    /// continue their walk instead).
    pub async fn snapshot(&self, region: Region, limit: usize) -> Result<Vec<FlightRecord>, FeedError> {
        let cancel = CancellationToken::new();
        let outcome = match &self.source {
            FlightSource::Live { client, .. } => {
                let mut fetcher = BatchFetcher::new(
                    OpenSkyUpstream::new(Arc::clone(client), region),
                    Arc::clone(&self.rate),
                    self.pacing.request_timeout(),
                );
                fetcher.fetch(limit, &cancel).await?
            }
            FlightSource::Replay { house, .. } => {
                debug!("📼 replay snapshot ignores region {region}");
                house.lock().await.fetch(limit, &cancel).await?
            }
        };
        match outcome {
            FetchOutcome::Records(records) => Ok(records),
            FetchOutcome::Cancelled => Ok(Vec::new()),
        }
    }

    /// 🌊 A stream session over `region`. Live sessions share this feed's rate controller;
    /// replay sessions get their own cursor and their own.
    pub fn session(
        &self,
        region: Region,
        config: EmitterConfig,
        cancel: CancellationToken,
    ) -> ChunkedStreamEmitter<FlightUpstream> {
        let (upstream, rate) = match &self.source {
            FlightSource::Live { client, .. } => (
                FlightUpstream::OpenSky(OpenSkyUpstream::new(Arc::clone(client), region)),
                Arc::clone(&self.rate),
            ),
            FlightSource::Replay {
                dataset, loop_enabled, ..
            } => (
                FlightUpstream::Replay(LocalUpstream::new(dataset.clone(), *loop_enabled)),
                Arc::new(RateController::new(self.pacing.rate_policy())),
            ),
        };
        let fetcher = BatchFetcher::new(upstream, rate, self.pacing.request_timeout());
        ChunkedStreamEmitter::new(fetcher, config, cancel)
    }
}

// ============================================================
//  🏗️ Both, together
// ============================================================

/// 🏗️ Everything the adapters stream from. Built once per process.
#[derive(Debug, Clone)]
pub struct Feeds {
    pub transcripts: Arc<TranscriptFeed>,
    pub flights: Arc<FlightFeed>,
}

impl Feeds {
    pub async fn from_config(config: &AppConfig) -> Result<Self, FeedError> {
        let transcripts = TranscriptFeed::from_config(&config.transcript).await?;
        let flights = FlightFeed::from_config(&config.flight).await?;
        info!(
            "🏗️ feeds ready: {} utterances, flights {}",
            transcripts.dataset().len(),
            match &flights.source {
                FlightSource::Live { .. } if flights.is_authenticated() => "live (authenticated)",
                FlightSource::Live { .. } => "live (anonymous)",
                FlightSource::Replay { .. } => "replayed",
            }
        );
        Ok(Self {
            transcripts: Arc::new(transcripts),
            flights: Arc::new(flights),
        })
    }
}
