//! JSON catalogue client over HTTP

use super::{Catalogue, ModInfo, RevisionInfo};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const MAX_RETRIES: u32 = 5;
const BASE_RETRY_DELAY_MS: u64 = 2000;
const MAX_RETRY_DELAY_MS: u64 = 60000;

/// Catalogue client backed by the catalogue REST service
#[derive(Clone)]
pub struct HttpCatalogue {
    client: Arc<reqwest::Client>,
    base_url: String,
    base_retry_delay_ms: u64,
}

#[derive(Deserialize)]
struct RevisionsResponse {
    latest: RevisionInfo,
    #[serde(default)]
    others: Vec<RevisionInfo>,
}

impl HttpCatalogue {
    /// Create a new catalogue client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        url::Url::parse(base_url)
            .with_context(|| format!("Invalid catalogue URL: {}", base_url))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("smods-manager/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            base_retry_delay_ms: BASE_RETRY_DELAY_MS,
        })
    }

    #[cfg(test)]
    fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.base_retry_delay_ms = delay_ms;
        self
    }

    fn retry_delay_ms(&self, attempt: u32) -> u64 {
        let base_delay = self.base_retry_delay_ms * (1 << (attempt - 1));
        let jitter: u64 = rand::thread_rng().gen_range(85..=115);
        (base_delay * jitter / 100).min(MAX_RETRY_DELAY_MS)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .with_context(|| format!("Failed to send request to {}", url))?;

            let status = response.status();

            // Rate limited or server-side trouble: back off and retry
            if status == 429 || status.is_server_error() {
                if attempt >= MAX_RETRIES {
                    bail!("Catalogue error after {} retries: {}", MAX_RETRIES, status);
                }

                let delay = response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(|secs| (secs * 1000).min(MAX_RETRY_DELAY_MS))
                    .unwrap_or_else(|| self.retry_delay_ms(attempt));

                tracing::warn!(
                    "Catalogue responded {} (attempt {}/{}), retrying in {}ms",
                    status,
                    attempt,
                    MAX_RETRIES,
                    delay
                );

                sleep(Duration::from_millis(delay)).await;
                continue;
            }

            if status.is_client_error() {
                let error_text = response.text().await.unwrap_or_default();
                bail!("Catalogue client error {} for {}: {}", status, path, error_text);
            }

            if !status.is_success() {
                bail!("Unexpected catalogue response status: {}", status);
            }

            let body = response
                .text()
                .await
                .context("Failed to read catalogue response body")?;
            let parsed = serde_json::from_str(&body)
                .with_context(|| format!("Failed to parse catalogue response for {}", path))?;

            tracing::debug!("Fetched {} (attempt {})", path, attempt);
            return Ok(parsed);
        }
    }
}

#[async_trait]
impl Catalogue for HttpCatalogue {
    async fn base_mod(&self, mod_id: &str) -> Result<ModInfo> {
        self.get_json(&format!("/mods/{}", mod_id)).await
    }

    async fn mod_revisions(&self, mod_id: &str) -> Result<(RevisionInfo, Vec<RevisionInfo>)> {
        let revisions: RevisionsResponse =
            self.get_json(&format!("/mods/{}/revisions", mod_id)).await?;
        Ok((revisions.latest, revisions.others))
    }

    async fn dependency_tree(&self, mod_id: &str) -> Result<Vec<ModInfo>> {
        let tree: Vec<ModInfo> = self
            .get_json(&format!("/mods/{}/dependencies", mod_id))
            .await?;
        Ok(tree.into_iter().filter(|m| m.id != mod_id).collect())
    }
}
