// ai
//! 🔧 App Configuration: the sacred TOML-to-struct pipeline, now with two feeds in it.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing.": every developer at 3am 🦆
//!
//! 🏗️ Layers, lowest to highest:
//! 1. serde defaults (an empty config is a valid config)
//! 2. the bare `PORT` / `HOST` variables every PaaS insists on setting
//! 3. `FEEDLOOP_*` environment variables, nested with `__`
//!    (`FEEDLOOP_SERVER__PORT=9000`)
//! 4. the TOML file, if one was given. TOML wins.
//!
//! `OPENSKY_CLIENT_ID` / `OPENSKY_CLIENT_SECRET` are honored too, but only to fill in
//! credentials the layers above left empty, and only when the flight source is OpenSky.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::dataset::TranscriptDatasetConfig;
use crate::error::FeedError;
use crate::feeds::{FlightConfig, FlightSourceConfig, TranscriptConfig};

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub flight: FlightConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🌐 Where the HTTP adapter listens.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 🧵 Knobs for the machinery between an emitter and its consumer.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// 📬 events buffered between a stream worker and its SSE body; the bound is the
    /// backpressure
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// 💓 seconds between SSE keep-alive comments on quiet streams
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_stream_buffer() -> usize {
    4
}

fn default_keep_alive_secs() -> u64 {
    15
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stream_buffer: default_stream_buffer(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl AppConfig {
    /// 🔍 Range checks serde can't express. Everything here is fatal at startup.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.runtime.stream_buffer == 0 {
            return Err(FeedError::Configuration("runtime.stream_buffer must be at least 1".to_string()));
        }
        if self.flight.max_flights == 0 {
            return Err(FeedError::Configuration("flight.max_flights must be at least 1".to_string()));
        }
        if self.transcript.fallback_enabled && self.transcript.fallback.conversations == 0 {
            return Err(FeedError::Configuration(
                "transcript.fallback.conversations must be at least 1 when the fallback is enabled".to_string(),
            ));
        }
        if let TranscriptDatasetConfig::Synthetic(synthetic) = &self.transcript.dataset
            && synthetic.conversations == 0
        {
            return Err(FeedError::Configuration(
                "transcript.dataset.Synthetic.conversations must be at least 1".to_string(),
            ));
        }
        if let TranscriptDatasetConfig::Remote(remote) = &self.transcript.dataset
            && !(remote.url.starts_with("http://") || remote.url.starts_with("https://"))
        {
            return Err(FeedError::Configuration(format!(
                "transcript.dataset.Remote.url must be an http(s) URL, got '{}'",
                remote.url
            )));
        }
        self.transcript.pacing.validate("transcript.pacing")?;
        match &self.flight.source {
            FlightSourceConfig::OpenSky(opensky) => opensky.pacing.validate("flight.source.OpenSky.pacing")?,
            FlightSourceConfig::Replay(replay) => replay.pacing.validate("flight.source.Replay.pacing")?,
        }
        Ok(())
    }

    /// 🔑 Fill empty OpenSky credentials from the bare variables the original deployment used.
    fn apply_opensky_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let FlightSourceConfig::OpenSky(opensky) = &mut self.flight.source {
            if opensky.client_id.as_deref().is_none_or(str::is_empty) {
                opensky.client_id = lookup("OPENSKY_CLIENT_ID");
            }
            if opensky.client_secret.as_deref().is_none_or(str::is_empty) {
                opensky.client_secret = lookup("OPENSKY_CLIENT_SECRET");
            }
        }
    }
}

fn figment(config_file_name: Option<&Path>) -> Figment {
    let config = Figment::new()
        .merge(Env::raw().only(&["PORT", "HOST"]).map(|key| format!("server.{}", key.as_str().to_lowercase()).into()))
        .merge(Env::prefixed("FEEDLOOP_").split("__"));
    match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of defaults.
///
/// - `None` → environment only.
/// - `Some(path)` → environment + TOML file, merged. TOML wins on conflicts.
///
/// 💀 An unparseable config or one that fails [`AppConfig::validate`] is an error with
/// enough context to fix it.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!("🔧 Loading configuration: {:?}", config_file_name.unwrap_or(Path::new("<environment only>")));

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (FEEDLOOP_*). \
             The file exists in our hearts, but apparently not in a shape serde recognises.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (FEEDLOOP_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    let mut config: AppConfig = figment(config_file_name).extract().context(context_msg)?;
    config.apply_opensky_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    config
        .validate()
        .context("💀 The configuration parsed, but its numbers don't add up")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstreams::Region;
    use std::io::Write;

    fn a_config_file(contents: &str) -> anyhow::Result<tempfile::NamedTempFile> {
        let mut the_file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        the_file.write_all(contents.as_bytes())?;
        Ok(the_file)
    }

    #[test]
    fn the_one_where_nothing_at_all_is_a_valid_config() -> anyhow::Result<()> {
        let the_config: AppConfig = Figment::new().extract()?;
        assert_eq!(the_config, AppConfig::default());
        assert_eq!(the_config.server.port, 8000);
        assert_eq!(the_config.runtime.stream_buffer, 4);
        the_config.validate()?;
        Ok(())
    }

    #[test]
    fn the_one_where_the_toml_file_picks_the_sources() -> anyhow::Result<()> {
        let the_file = a_config_file(
            r#"
            [server]
            port = 9123

            [transcript]
            loop_enabled = false

            [transcript.dataset.Synthetic]
            conversations = 50
            seed = 7

            [flight.source.OpenSky]
            region = "EUROPE"

            [flight.source.OpenSky.pacing]
            min_interval_ms = 10000

            [runtime]
            stream_buffer = 16
            "#,
        )?;
        let the_config = load_config(Some(the_file.path()))?;

        assert_eq!(the_config.server.port, 9123);
        assert!(!the_config.transcript.loop_enabled);
        assert!(matches!(
            the_config.transcript.dataset,
            TranscriptDatasetConfig::Synthetic(ref s) if s.conversations == 50 && s.seed == Some(7)
        ));
        match &the_config.flight.source {
            FlightSourceConfig::OpenSky(o) => {
                assert_eq!(o.region, Region::Europe);
                assert_eq!(o.pacing.min_interval_ms, 10_000);
            }
            honestly_who_knows => panic!("💀 expected OpenSky, serde took us to {honestly_who_knows:?}"),
        }
        assert_eq!(the_config.runtime.stream_buffer, 16);
        Ok(())
    }

    #[test]
    fn the_one_where_a_zero_buffer_is_turned_away_at_the_door() -> anyhow::Result<()> {
        let the_file = a_config_file("[runtime]\nstream_buffer = 0\n")?;
        let the_error = match load_config(Some(the_file.path())) {
            Ok(_) => panic!("💀 a zero stream buffer should not validate"),
            Err(e) => e,
        };
        assert!(format!("{the_error:#}").contains("stream_buffer"));
        Ok(())
    }

    #[test]
    fn the_one_where_pacing_that_can_never_succeed_is_refused() -> anyhow::Result<()> {
        for (the_toml, the_knob) in [
            ("[transcript.pacing]\nrequest_timeout_secs = 0\n", "transcript.pacing.request_timeout_secs"),
            (
                "[flight.source.OpenSky.pacing]\ninitial_backoff_ms = 5000\nmax_backoff_ms = 1000\n",
                "flight.source.OpenSky.pacing.max_backoff_ms",
            ),
        ] {
            let the_file = a_config_file(the_toml)?;
            let the_error = match load_config(Some(the_file.path())) {
                Ok(_) => panic!("💀 {the_knob} should not validate"),
                Err(e) => e,
            };
            assert!(format!("{the_error:#}").contains(the_knob), "{the_error:#}");
        }
        Ok(())
    }

    #[test]
    fn the_one_where_bare_opensky_variables_fill_the_gaps_only() {
        let mut the_config = AppConfig::default();
        if let FlightSourceConfig::OpenSky(o) = &mut the_config.flight.source {
            o.client_id = Some("from-toml".to_string());
        }
        the_config.apply_opensky_env(|key| Some(format!("env-{key}")));

        match &the_config.flight.source {
            FlightSourceConfig::OpenSky(o) => {
                assert_eq!(o.client_id.as_deref(), Some("from-toml"));
                assert_eq!(o.client_secret.as_deref(), Some("env-OPENSKY_CLIENT_SECRET"));
            }
            honestly_who_knows => panic!("💀 expected OpenSky, got {honestly_who_knows:?}"),
        }
    }

    #[test]
    fn the_one_where_a_remote_dataset_needs_a_real_url() {
        let mut the_config = AppConfig::default();
        the_config.transcript.dataset = TranscriptDatasetConfig::Remote(crate::dataset::remote::RemoteConfig {
            url: "ftp://nope".to_string(),
            timeout_secs: 10,
        });
        assert!(matches!(the_config.validate(), Err(FeedError::Configuration(_))));
    }
}
