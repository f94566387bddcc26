// ai
//! ✈️ OpenSky: live aircraft state vectors from the OpenSky Network REST API.
//!
//! 🎬 *[somewhere over the Atlantic, a transponder says hello.]*
//! *[seventeen fields. four of them null. one callsign padded with spaces like it's 1987.]*
//!
//! 🧠 Knowledge graph:
//! - [`OpenSkyClient`] is shared (`Arc`) by every flight session: one HTTP client, one
//!   [`TokenManager`], one bearer token cache. The `RateController` that spaces calls five
//!   seconds apart lives in the feed and is shared the same way.
//! - [`OpenSkyUpstream`] is one session's view: a client plus a [`Region`].
//! - Anonymous access works (100 calls/day). With `client_id` + `client_secret` configured,
//!   the OAuth2 client-credentials refresher kicks in (4000 calls/day).
//! - State arrays shorter than 17 entries, or missing icao24/longitude/latitude, are skipped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::Upstream;
use super::common_config::CommonUpstreamConfig;
use crate::error::FeedError;
use crate::records::FlightState;
use crate::token::{DEFAULT_SAFETY_MARGIN, OAuthClientCredentials, TokenManager};

// ============================================================
//  🗺️ Regions
// ============================================================

/// 🗺️ Named bounding boxes the flight feed can be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Region {
    Europe,
    #[default]
    NorthAmerica,
    SouthAmerica,
    Asia,
    Australia,
    Africa,
    Global,
}

/// 📐 Latitude/longitude min/max, in the order the upstream's query wants them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lamin: f64,
    pub lamax: f64,
    pub lomin: f64,
    pub lomax: f64,
}

impl Region {
    pub const ALL: [Region; 7] = [
        Region::Europe,
        Region::NorthAmerica,
        Region::SouthAmerica,
        Region::Asia,
        Region::Australia,
        Region::Africa,
        Region::Global,
    ];

    pub fn bbox(self) -> BoundingBox {
        let (lamin, lamax, lomin, lomax) = match self {
            Region::Europe => (35.0, 72.0, -25.0, 45.0),
            Region::NorthAmerica => (7.0, 72.0, -168.0, -60.0),
            Region::SouthAmerica => (-56.0, 15.0, -90.0, -30.0),
            Region::Asia => (-10.0, 82.0, 45.0, 180.0),
            Region::Australia => (-50.0, -10.0, 110.0, 180.0),
            Region::Africa => (-35.0, 37.0, -20.0, 52.0),
            Region::Global => (-90.0, 90.0, -180.0, 180.0),
        };
        BoundingBox {
            lamin,
            lamax,
            lomin,
            lomax,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Europe => "EUROPE",
            Region::NorthAmerica => "NORTH_AMERICA",
            Region::SouthAmerica => "SOUTH_AMERICA",
            Region::Asia => "ASIA",
            Region::Australia => "AUSTRALIA",
            Region::Africa => "AFRICA",
            Region::Global => "GLOBAL",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
//  🎛️ Config
// ============================================================

/// 🎛️ Everything needed to talk to OpenSky.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OpenSkyConfig {
    #[serde(default = "default_states_url")]
    pub states_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub region: Region,
    /// ⏱️ seconds shaved off a token's lifetime before it is considered expired
    #[serde(default = "default_token_safety_margin_secs")]
    pub token_safety_margin_secs: u64,
    #[serde(default = "default_opensky_pacing")]
    pub pacing: CommonUpstreamConfig,
}

fn default_states_url() -> String {
    "https://opensky-network.org/api/states/all".to_string()
}

fn default_token_url() -> String {
    "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token".to_string()
}

fn default_token_safety_margin_secs() -> u64 {
    DEFAULT_SAFETY_MARGIN.as_secs()
}

// 🚦 the upstream asks for five seconds between requests; we listen
fn default_opensky_pacing() -> CommonUpstreamConfig {
    CommonUpstreamConfig::with_min_interval(Duration::from_secs(5))
}

impl Default for OpenSkyConfig {
    fn default() -> Self {
        Self {
            states_url: default_states_url(),
            token_url: default_token_url(),
            client_id: None,
            client_secret: None,
            region: Region::default(),
            token_safety_margin_secs: default_token_safety_margin_secs(),
            pacing: default_opensky_pacing(),
        }
    }
}

// ============================================================
//  🌐 Client
// ============================================================

/// 🌐 Shared OpenSky client: HTTP connection pool + credential cache.
#[derive(Debug)]
pub struct OpenSkyClient {
    http: reqwest::Client,
    states_url: String,
    tokens: TokenManager,
}

#[derive(Deserialize)]
struct StatesResponse {
    #[serde(default)]
    states: Option<Vec<Vec<Value>>>,
}

impl OpenSkyClient {
    pub fn new(config: &OpenSkyConfig) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.pacing.request_timeout())
            .build()
            .context("💀 The OpenSky HTTP client could not be built. The planes will have to wait.")
            .map_err(|e| FeedError::Configuration(format!("{e:#}")))?;

        let tokens = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                info!("🔑 OpenSky credentials configured: authenticated access");
                TokenManager::new(
                    Arc::new(OAuthClientCredentials::new(
                        http.clone(),
                        config.token_url.clone(),
                        id.clone(),
                        secret.clone(),
                    )),
                    Duration::from_secs(config.token_safety_margin_secs),
                )
            }
            _ => {
                info!("🕶️ no OpenSky credentials: anonymous access (100 calls/day)");
                TokenManager::anonymous()
            }
        };

        Ok(Self {
            http,
            states_url: config.states_url.clone(),
            tokens,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated()
    }

    /// 📡 Current state vectors inside `region`.
    pub async fn states(&self, region: Region) -> Result<Vec<FlightState>, FeedError> {
        let bbox = region.bbox();
        let request = self.http.get(&self.states_url).query(&[
            ("lamin", bbox.lamin),
            ("lamax", bbox.lamax),
            ("lomin", bbox.lomin),
            ("lomax", bbox.lomax),
        ]);
        let body = self.send(request).await?;
        let parsed: StatesResponse = serde_json::from_value(body)
            .map_err(|e| FeedError::Schema(format!("OpenSky response is not a states document: {e}")))?;
        let states = parse_states(parsed.states.unwrap_or_default());
        debug!("✈️ {} state vectors over {}", states.len(), region);
        Ok(states)
    }

    /// 🩺 Is the upstream answering at all? A bounded probe, not a full fetch.
    pub async fn probe(&self) -> Result<(), FeedError> {
        let bbox = Region::Europe.bbox();
        let request = self.http.get(&self.states_url).timeout(Duration::from_secs(5)).query(&[
            ("lamin", bbox.lamin),
            ("lamax", bbox.lamin + 1.0),
            ("lomin", bbox.lomin),
            ("lomax", bbox.lomin + 1.0),
        ]);
        self.send(request).await.map(|_| ())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, FeedError> {
        let request = match self.tokens.get_token().await? {
            Some(credential) => request.bearer_auth(credential.token),
            None => request,
        };
        let response = request.send().await.map_err(FeedError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                // 🗑️ a token revoked upstream still looks fresh here; make the next call mint one
                self.tokens.invalidate().await;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::from_status(status, body));
        }
        response.json::<Value>().await.map_err(FeedError::from_reqwest)
    }
}

/// 🧹 Turn raw 17-field state arrays into typed state vectors, skipping the unusable ones.
pub(crate) fn parse_states(states: Vec<Vec<Value>>) -> Vec<FlightState> {
    states
        .into_iter()
        .filter(|s| s.len() >= 17)
        .filter_map(|s| {
            let icao24 = s[0].as_str()?.to_string();
            let longitude = s[5].as_f64()?;
            let latitude = s[6].as_f64()?;
            Some(FlightState {
                icao24,
                callsign: s[1]
                    .as_str()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
                origin_country: s[2].as_str().unwrap_or_default().to_string(),
                time_position: epoch(&s[3]),
                last_contact: epoch(&s[4]),
                longitude,
                latitude,
                geo_altitude: s[7].as_f64(),
                on_ground: s[8].as_bool(),
                velocity: s[9].as_f64(),
                true_track: s[10].as_f64(),
                vertical_rate: s[11].as_f64(),
            })
        })
        .collect()
}

fn epoch(value: &Value) -> Option<DateTime<Utc>> {
    value.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0))
}

// ============================================================
//  🔌 Upstream
// ============================================================

/// ✈️ One session's window onto OpenSky: a shared client and a region.
#[derive(Debug, Clone)]
pub struct OpenSkyUpstream {
    client: Arc<OpenSkyClient>,
    region: Region,
}

impl OpenSkyUpstream {
    pub fn new(client: Arc<OpenSkyClient>, region: Region) -> Self {
        Self { client, region }
    }
}

#[async_trait]
impl Upstream for OpenSkyUpstream {
    type Record = FlightState;

    /// 📡 One poll, truncated to `window`. The sky does not paginate.
    async fn pull(&mut self, window: usize) -> Result<Vec<FlightState>, FeedError> {
        let mut states = self.client.states(self.region).await?;
        states.truncate(window);
        Ok(states)
    }

    fn describe(&self) -> String {
        format!("OpenSky over {}", self.region)
    }
}
