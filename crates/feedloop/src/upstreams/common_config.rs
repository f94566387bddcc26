// ai
//! 🎬 *[every upstream wants a timeout. every upstream wants a retry budget.]*
//! *[one struct volunteers. the others are relieved.]*
//!
//! 📦 **Common Upstream Config**: the pacing knobs every upstream shares.
//!
//! 🧠 Knowledge graph:
//! - Embedded in `OpenSkyConfig`, `TranscriptApiConfig` and the local feed settings.
//! - [`CommonUpstreamConfig::rate_policy`] turns milliseconds-in-TOML into a
//!   [`RatePolicy`] the `RateController` understands.
//! - [`CommonUpstreamConfig::request_timeout`] bounds each single upstream call inside
//!   `BatchFetcher`. A timeout counts as a transient failure. 🦆

use std::time::Duration;

use serde::Deserialize;

use crate::error::FeedError;
use crate::rate_control::RatePolicy;

/// 📦 Shared pacing + retry configuration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommonUpstreamConfig {
    /// ⏱️ minimum gap between calls, in milliseconds
    #[serde(default)]
    pub min_interval_ms: u64,
    /// ⏱️ per-call timeout, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 🔁 retries after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

// ⏱️ 10 seconds. Long enough for OpenSky on a bad day, short enough that a wedged socket
// doesn't eat a whole stream session.
fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

// 🔁 1s, 2s, 4s... then the ceiling
fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for CommonUpstreamConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 0,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl CommonUpstreamConfig {
    /// 🚦 Same knobs, with a different minimum interval. OpenSky wants five seconds.
    pub fn with_min_interval(min_interval: Duration) -> Self {
        Self {
            min_interval_ms: min_interval.as_millis() as u64,
            ..Self::default()
        }
    }

    /// 🔍 Refuse knobs that would make every call fail: a zero timeout, or a backoff
    /// ceiling below its starting point. `section` names the table in the error.
    pub fn validate(&self, section: &str) -> Result<(), FeedError> {
        if self.request_timeout_secs == 0 {
            return Err(FeedError::Configuration(format!(
                "{section}.request_timeout_secs must be at least 1"
            )));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(FeedError::Configuration(format!(
                "{section}.max_backoff_ms ({}) must not be below initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn rate_policy(&self) -> RatePolicy {
        RatePolicy {
            min_interval: Duration::from_millis(self.min_interval_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            max_retries: self.max_retries,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_an_empty_table_means_sensible_defaults() -> anyhow::Result<()> {
        let the_config: CommonUpstreamConfig = toml::from_str("")?;
        assert_eq!(the_config, CommonUpstreamConfig::default());
        assert_eq!(the_config.request_timeout(), Duration::from_secs(10));
        assert_eq!(the_config.rate_policy().max_retries, 3);
        Ok(())
    }

    #[test]
    fn the_one_where_a_backwards_backoff_ceiling_is_quietly_lifted() -> anyhow::Result<()> {
        let the_config: CommonUpstreamConfig =
            toml::from_str("initial_backoff_ms = 5000\nmax_backoff_ms = 100\nmin_interval_ms = 250")?;
        let the_policy = the_config.rate_policy();
        assert_eq!(the_policy.max_backoff, Duration::from_secs(5));
        assert_eq!(the_policy.min_interval, Duration::from_millis(250));
        Ok(())
    }
}
