// ai
//! 🔑 TokenManager: keeper of the bearer token, refresher of the nearly-expired.
//!
//! 🎬 *[a token has 4 minutes left to live. the safety margin is 5 minutes.]*
//! *["You're already dead," says the TokenManager, gently, and fetches a new one.]*
//!
//! Lazy: nothing refreshes until somebody asks. No background task, no timer wheel.
//! The cache mutex is held across check-and-refresh, so ten callers arriving during a
//! refresh wait for it and then share its result. One POST, not ten. 🦆

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::FeedError;

/// 🔑 A bearer token and the moment it stops working.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: Instant::now() + lifetime,
        }
    }

    /// ⏳ Still usable with `margin` to spare?
    pub fn is_fresh(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

// 🙈 tokens do not go in logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// 🔄 Something that can mint a new credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync + fmt::Debug {
    async fn refresh(&self) -> Result<Credential, FeedError>;
}

/// 🗝️ Cached, lazily refreshed credential. `None` refresher means anonymous access.
#[derive(Debug)]
pub struct TokenManager {
    refresher: Option<Arc<dyn TokenRefresher>>,
    cached: Mutex<Option<Credential>>,
    safety_margin: Duration,
}

/// ⏱️ refresh five minutes early, as the upstream's own client does
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(300);

impl TokenManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>, safety_margin: Duration) -> Self {
        Self {
            refresher: Some(refresher),
            cached: Mutex::new(None),
            safety_margin,
        }
    }

    /// 🕶️ No credentials configured. `get_token` always answers `None`.
    pub fn anonymous() -> Self {
        Self {
            refresher: None,
            cached: Mutex::new(None),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.refresher.is_some()
    }

    /// 🔑 A fresh credential, refreshing first if the cached one is absent or close to expiry.
    ///
    /// A failed refresh is an `Authentication` error. A stale token is never handed out.
    pub async fn get_token(&self) -> Result<Option<Credential>, FeedError> {
        let Some(refresher) = &self.refresher else {
            return Ok(None);
        };

        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref().filter(|c| c.is_fresh(self.safety_margin)) {
            return Ok(Some(credential.clone()));
        }

        debug!("🔄 credential missing or inside the safety margin: refreshing");
        // 💀 drop the stale one first, so a failed refresh cannot leave it lying around
        *cached = None;
        let fresh = refresher.refresh().await.map_err(|e| match e {
            FeedError::Authentication(_) => e,
            other => FeedError::Authentication(format!("token refresh failed: {other}")),
        })?;
        *cached = Some(fresh.clone());
        Ok(Some(fresh))
    }

    /// 🗑️ Forget the cached credential so the next `get_token` refreshes. For when the
    /// upstream rejects a token that still looks fresh locally (revoked server-side).
    pub async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            debug!("🗑️ upstream rejected the cached credential: dropping it");
        }
    }
}

// ============================================================
//  🌐 OAuth2 client-credentials refresher
// ============================================================

/// 🌐 Client-credentials grant against an OAuth2 token endpoint.
#[derive(Debug)]
pub struct OAuthClientCredentials {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    1800
}

impl OAuthClientCredentials {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClientCredentials {
    async fn refresh(&self) -> Result<Credential, FeedError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FeedError::Authentication(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Authentication(format!(
                "token endpoint said {status}: {body}"
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Authentication(format!("token response unreadable: {e}")))?;
        info!("🔑 obtained access token, valid for {}s", parsed.expires_in);
        Ok(Credential::new(parsed.access_token, Duration::from_secs(parsed.expires_in)))
    }
}
