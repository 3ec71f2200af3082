//! Edge cache provider clients.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::PurgeError;
use crate::user_agent;

/// "Purge these URLs" capability of the edge cache.
#[async_trait]
pub trait EdgePurger: Send + Sync {
    /// Evicts `urls`. Purging an uncached URL succeeds.
    async fn purge(&self, urls: &[String]) -> Result<(), PurgeError>;
}

/// Used when no purge endpoint is configured; always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEdgePurger;

#[async_trait]
impl EdgePurger for NoopEdgePurger {
    async fn purge(&self, urls: &[String]) -> Result<(), PurgeError> {
        debug!(urls = urls.len(), "edge purge disabled, skipping");
        Ok(())
    }
}

#[derive(Serialize)]
struct PurgeRequest<'a> {
    files: &'a [String],
}

#[derive(Deserialize)]
struct PurgeResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

fn default_success() -> bool {
    true
}

/// Purges through a Cloudflare-style `purge_cache` HTTP API.
///
/// Sends `POST {endpoint}` with body `{"files": [...]}` and an optional bearer
/// token. Non-2xx answers and `"success": false` bodies are failures.
#[derive(Debug, Clone)]
pub struct HttpEdgePurger {
    client: Client,
    endpoint: Url,
    api_token: Option<String>,
}

impl HttpEdgePurger {
    /// Creates a purger whose every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PurgeError::Http`] if the HTTP client cannot be built.
    pub fn new(endpoint: Url, api_token: Option<String>, timeout: Duration) -> Result<Self, PurgeError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(user_agent::default_purge_user_agent())
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_token,
        })
    }

    /// Target endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl EdgePurger for HttpEdgePurger {
    #[instrument(skip(self, urls), fields(endpoint = %self.endpoint, urls = urls.len()))]
    async fn purge(&self, urls: &[String]) -> Result<(), PurgeError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&PurgeRequest { files: urls });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PurgeError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        // Providers without a JSON envelope are judged by status alone
        if let Ok(parsed) = serde_json::from_str::<PurgeResponse>(&body)
            && !parsed.success
        {
            let detail = serde_json::to_string(&parsed.errors).unwrap_or_default();
            return Err(PurgeError::Rejected(detail));
        }

        debug!("edge purge accepted");
        Ok(())
    }
}
