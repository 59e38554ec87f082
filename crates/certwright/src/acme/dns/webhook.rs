//! Generic webhook DNS provider
//!
//! Talks to a small JSON API in front of the managed DNS service.
//!
//! # Webhook API
//!
//! ## Find Zones
//! ```text
//! GET {url}/zones?name=example.com
//!
//! Response:
//! {
//!   "zones": [{ "id": "Z123", "name": "example.com." }]
//! }
//! ```
//!
//! ## Change Records
//! ```text
//! POST {url}/zones/{zone_id}/changes
//! Content-Type: application/json
//!
//! {
//!   "changes": [{
//!     "action": "UPSERT",
//!     "name": "_acme-challenge.www.example.com.",
//!     "type": "TXT",
//!     "ttl": 60,
//!     "values": ["challenge-value"]
//!   }]
//! }
//!
//! Response: 200 OK or 204 No Content
//! ```
//!
//! A 404 answer to a batch made only of deletions means the records are
//! already gone and counts as success.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{
    ChangeAction, DnsProvider, DnsProviderError, DnsResult, HostedZone, RecordChange,
};
use certwright_config::DnsProviderConfig;

/// Webhook DNS provider
#[derive(Debug)]
pub struct WebhookDnsProvider {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    token: Option<String>,
    timeout: Duration,
}

impl WebhookDnsProvider {
    /// Create a new webhook DNS provider
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL for the webhook API
    /// * `auth_header` - Optional custom auth header name (e.g., "X-API-Key")
    /// * `token` - Optional API token, sent as bearer token by default
    /// * `timeout` - Request timeout
    pub fn new(
        base_url: &str,
        auth_header: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> DnsResult<Self> {
        if base_url.is_empty() {
            return Err(DnsProviderError::Configuration(
                "Webhook URL is empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsProviderError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
            token,
            timeout,
        })
    }

    /// Create a provider from the `dns-provider` configuration block
    pub fn from_config(config: &DnsProviderConfig) -> DnsResult<Self> {
        Self::new(
            &config.url,
            config.auth_header.clone(),
            config.token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn add_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth_header, &self.token) {
            (Some(header), Some(token)) => request.header(header.as_str(), token.as_str()),
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> DnsResult<reqwest::Response> {
        let response = self.add_auth(request).send().await.map_err(|e| {
            if e.is_timeout() {
                DnsProviderError::Timeout {
                    elapsed_secs: self.timeout.as_secs(),
                }
            } else {
                DnsProviderError::ApiRequest(format!("Webhook request failed: {}", e))
            }
        })?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(DnsProviderError::Authentication(format!(
                "Webhook returned HTTP {}",
                response.status()
            )));
        }

        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    #[serde(default)]
    zones: Vec<HostedZone>,
}

#[derive(Debug, Serialize)]
struct ChangeBatch<'a> {
    changes: &'a [RecordChange],
}

#[async_trait]
impl DnsProvider for WebhookDnsProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn find_zones_by_name(&self, name: &str) -> DnsResult<Vec<HostedZone>> {
        debug!(name = %name, url = %self.base_url, "Looking up hosted zones via webhook");

        let request = self
            .client
            .get(format!("{}/zones", self.base_url))
            .query(&[("name", name)]);
        let response = self.send(request).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::ApiRequest(format!(
                "Webhook returned HTTP {} - {}",
                status, body
            )));
        }

        let zones: ZonesResponse = response.json().await.map_err(|e| {
            DnsProviderError::ApiRequest(format!("Failed to parse webhook response: {}", e))
        })?;

        debug!(name = %name, candidates = zones.zones.len(), "Hosted zones returned");
        Ok(zones.zones)
    }

    async fn change_records(&self, zone_id: &str, changes: &[RecordChange]) -> DnsResult<()> {
        debug!(
            zone_id = %zone_id,
            changes = changes.len(),
            "Changing records via webhook"
        );

        let request = self
            .client
            .post(format!("{}/zones/{}/changes", self.base_url, zone_id))
            .json(&ChangeBatch { changes });
        let response = self.send(request).await?;

        let only_deletes = changes.iter().all(|c| c.action == ChangeAction::Delete);
        if response.status() == StatusCode::NOT_FOUND && only_deletes {
            debug!(zone_id = %zone_id, "Records already deleted");
            return Ok(());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::RecordChange {
                zone_id: zone_id.to_string(),
                message: format!("Webhook returned HTTP {} - {}", status, body),
            });
        }

        debug!(zone_id = %zone_id, "Record changes applied via webhook");
        Ok(())
    }
}
