// ai
//! 🌐 RemoteLoader: the dataset lives on someone else's computer.
//!
//! One GET, the whole JSONL body, parsed exactly like a local file. Gzip sniffed.
//! A failure here is a startup failure, which `load_transcripts` may paper over with the
//! synthetic generator if (and only if) the config says so.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::error::FeedError;
use crate::records::Record;

/// 🌐 Where to download the dataset from.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RemoteConfig {
    pub url: String,
    /// ⏱️ whole-download timeout; datasets are big, so this is generous
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_download_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone)]
pub struct RemoteLoader {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteLoader {
    pub fn new(config: RemoteConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. Probably not your fault.")
            .map_err(|e| FeedError::Configuration(format!("{e:#}")))?;
        Ok(Self { client, config })
    }

    /// 📡 Download and parse. Non-2xx and transport errors come back classified.
    pub async fn load<R: Record>(&self) -> Result<Vec<R>, FeedError> {
        info!("🌐 Downloading dataset from {}", self.config.url);
        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(FeedError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::from_status(status, body));
        }
        let bytes = response.bytes().await.map_err(FeedError::from_reqwest)?;
        let records = super::parse_jsonl(&bytes, &self.config.url)?;
        info!("✅ Downloaded {} records from {}", records.len(), self.config.url);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Utterance, fixtures};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn the_one_where_the_dataset_arrives_by_mail() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        let the_body = fixtures::conversations(&[2, 1])
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?
            .join("\n");
        Mock::given(method("GET"))
            .and(path("/datasets/conversations.jsonl"))
            .respond_with(ResponseTemplate::new(200).set_body_string(the_body))
            .mount(&the_server)
            .await;

        let the_loader = RemoteLoader::new(RemoteConfig {
            url: format!("{}/datasets/conversations.jsonl", the_server.uri()),
            timeout_secs: 5,
        })?;
        let the_records: Vec<Utterance> = the_loader.load().await?;
        assert_eq!(the_records.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_404_is_not_mistaken_for_a_dataset() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone fishing"))
            .mount(&the_server)
            .await;

        let the_loader = RemoteLoader::new(RemoteConfig {
            url: format!("{}/missing.jsonl", the_server.uri()),
            timeout_secs: 5,
        })?;
        let the_verdict = the_loader.load::<Utterance>().await;
        assert!(matches!(the_verdict, Err(FeedError::Upstream { status: 404, .. })));
        Ok(())
    }
}
