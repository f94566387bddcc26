// ai
//! 📞 TranscriptApiUpstream: polls another feedloop (or anything shaped like one).
//!
//! 🎬 *[feedloop calls feedloop. it's feedloops all the way down.]*
//!
//! Hits `GET {base_url}/transcript/utterances?limit=N`, which loops through its dataset on
//! the server side. Windows bigger than the endpoint's cap of 100 become several requests.
//! Timestamps in the response are discarded; records are re-stamped when the fetch returns.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::Upstream;
use super::common_config::CommonUpstreamConfig;
use crate::error::FeedError;
use crate::records::Utterance;

/// 🔢 the polling endpoint refuses bigger pages than this
pub const MAX_PAGE: usize = 100;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TranscriptApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub pacing: CommonUpstreamConfig,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for TranscriptApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            pacing: CommonUpstreamConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct TranscriptApiUpstream {
    http: reqwest::Client,
    base_url: String,
    /// 📥 utterances the server already handed over but no pull has returned yet. The
    /// remote cursor has moved past them, so they must survive a failed page.
    pending: Vec<Utterance>,
}

impl TranscriptApiUpstream {
    pub fn new(config: &TranscriptApiConfig) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.pacing.request_timeout())
            .build()
            .context("💀 The transcript API client could not be built")
            .map_err(|e| FeedError::Configuration(format!("{e:#}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pending: Vec::new(),
        })
    }

    /// 🩺 Say hello to `/transcript/status`. Failure is a warning, not a verdict: the first
    /// real poll gets to decide.
    pub async fn check_connection(&self) {
        let url = format!("{}/transcript/status", self.base_url);
        match self.http.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(response) if response.status().is_success() => match response.json::<serde_json::Value>().await {
                Ok(status) => info!(
                    "📞 connected to transcript API at {} ({} records available)",
                    self.base_url, status["records_available"]
                ),
                Err(e) => warn!(
                    "⚠️ transcript API at {} answered, but its status body was not JSON: {e}",
                    self.base_url
                ),
            },
            Ok(response) => warn!("⚠️ transcript API at {} answered {}", self.base_url, response.status()),
            Err(e) => warn!("⚠️ could not reach transcript API at {}: {e}; polling anyway", self.base_url),
        }
    }

    async fn page(&self, limit: usize) -> Result<Vec<Utterance>, FeedError> {
        let url = format!("{}/transcript/utterances", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(FeedError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::from_status(status, body));
        }
        response.json().await.map_err(FeedError::from_reqwest)
    }
}

#[async_trait]
impl Upstream for TranscriptApiUpstream {
    type Record = Utterance;

    async fn pull(&mut self, window: usize) -> Result<Vec<Utterance>, FeedError> {
        // 📥 pages land in `pending` as they arrive, so an error (or a timeout dropping this
        // future) halfway through keeps them for the retry
        while self.pending.len() < window {
            let page = self.page((window - self.pending.len()).min(MAX_PAGE)).await?;
            if page.is_empty() {
                break;
            }
            self.pending.extend(page);
        }
        let leftover = self.pending.split_off(window.min(self.pending.len()));
        Ok(std::mem::replace(&mut self.pending, leftover))
    }

    fn describe(&self) -> String {
        format!("transcript API at {}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn a_server_with_pages() -> MockServer {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transcript/utterances"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::conversations(&[100])))
            .expect(2)
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcript/utterances"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::conversations(&[50])))
            .expect(1)
            .mount(&the_server)
            .await;
        the_server
    }

    #[tokio::test]
    async fn the_one_where_a_big_window_is_split_into_polite_pages() -> anyhow::Result<()> {
        let the_server = a_server_with_pages().await;
        let mut the_upstream = TranscriptApiUpstream::new(&TranscriptApiConfig {
            base_url: format!("{}/", the_server.uri()),
            ..TranscriptApiConfig::default()
        })?;
        let the_window = the_upstream.pull(250).await?;
        assert_eq!(the_window.len(), 250);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_server_error_is_worth_retrying() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&the_server)
            .await;
        let mut the_upstream = TranscriptApiUpstream::new(&TranscriptApiConfig {
            base_url: the_server.uri(),
            ..TranscriptApiConfig::default()
        })?;
        the_upstream.check_connection().await;
        let the_verdict = the_upstream.pull(10).await;
        assert!(matches!(the_verdict, Err(FeedError::TransientUpstream(_))));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_garbled_status_body_is_a_warning_not_a_crash() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transcript/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>definitely not json</html>"))
            .expect(1)
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcript/utterances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::conversations(&[3])))
            .mount(&the_server)
            .await;
        let mut the_upstream = TranscriptApiUpstream::new(&TranscriptApiConfig {
            base_url: the_server.uri(),
            ..TranscriptApiConfig::default()
        })?;
        the_upstream.check_connection().await;
        assert_eq!(the_upstream.pull(3).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_second_page_does_not_lose_the_first() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        // conv_000001 first, then one hiccup, then conv_000002
        Mock::given(method("GET"))
            .and(path("/transcript/utterances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::conversations(&[100])))
            .up_to_n_times(1)
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcript/utterances"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcript/utterances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::conversations(&[0, 100])))
            .mount(&the_server)
            .await;
        let mut the_upstream = TranscriptApiUpstream::new(&TranscriptApiConfig {
            base_url: the_server.uri(),
            ..TranscriptApiConfig::default()
        })?;

        let the_first_try = the_upstream.pull(200).await;
        assert!(matches!(the_first_try, Err(FeedError::TransientUpstream(_))));

        let the_window = the_upstream.pull(200).await?;
        assert_eq!(the_window.len(), 200);
        assert!(the_window[..100].iter().all(|u| u.conversation_id == "conv_000001"));
        assert!(the_window[100..].iter().all(|u| u.conversation_id == "conv_000002"));
        assert_eq!(the_window[0].utterance_id, 0);
        assert_eq!(the_window[100].utterance_id, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_overfull_page_saves_the_rest_for_next_time() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::conversations(&[15])))
            .expect(1)
            .mount(&the_server)
            .await;
        let mut the_upstream = TranscriptApiUpstream::new(&TranscriptApiConfig {
            base_url: the_server.uri(),
            ..TranscriptApiConfig::default()
        })?;
        let the_first = the_upstream.pull(10).await?;
        let the_second = the_upstream.pull(5).await?;
        assert_eq!(the_first.len(), 10);
        assert_eq!(the_second.iter().map(|u| u.utterance_id).collect::<Vec<_>>(), vec![10, 11, 12, 13, 14]);
        Ok(())
    }
}
