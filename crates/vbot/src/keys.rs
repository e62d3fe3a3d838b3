//! Travis CI public key retrieval.
//!
//! The signing key is fetched fresh for every verification. A cached key
//! could keep accepting signatures after Travis rotates or revokes it.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CiConfig;
use crate::error::KeyFetchError;

/// Config endpoint for travis-ci.com.
pub const TRAVIS_COM_CONFIG_URL: &str = "https://api.travis-ci.com/config";
/// Config endpoint for travis-ci.org.
pub const TRAVIS_ORG_CONFIG_URL: &str = "https://api.travis-ci.org/config";

/// Travis CI deployment. The two sign with different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderVariant {
    /// travis-ci.com
    Com,
    /// travis-ci.org
    Org,
}

impl ProviderVariant {
    /// Identify the deployment from a build URL.
    #[must_use]
    pub fn from_build_url(build_url: &str) -> Option<Self> {
        if build_url.starts_with("https://travis-ci.com")
            || build_url.starts_with("https://app.travis-ci.com")
        {
            Some(Self::Com)
        } else if build_url.starts_with("https://travis-ci.org") {
            Some(Self::Org)
        } else {
            None
        }
    }

    /// Short name used in configuration and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Com => "com",
            Self::Org => "org",
        }
    }
}

impl FromStr for ProviderVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "com" | "travis-ci.com" => Ok(Self::Com),
            "org" | "travis-ci.org" => Ok(Self::Org),
            other => Err(format!("unknown Travis CI provider: {other}")),
        }
    }
}

/// Source of the CI provider's webhook signing key.
#[async_trait]
pub trait PublicKeySource: Send + Sync {
    /// Fetch the current PEM-encoded public key for `variant`.
    async fn fetch(&self, variant: ProviderVariant) -> Result<String, KeyFetchError>;
}

/// Fetches signing keys from the Travis CI `/config` endpoints.
#[derive(Debug, Clone)]
pub struct TravisKeyFetcher {
    client: reqwest::Client,
    com_url: String,
    org_url: String,
}

impl TravisKeyFetcher {
    /// Create a fetcher with explicit endpoints and timeout.
    pub fn new(
        com_url: impl Into<String>,
        org_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            com_url: com_url.into(),
            org_url: org_url.into(),
        })
    }

    /// Create a fetcher from CI configuration.
    pub fn from_config(config: &CiConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            &config.com_config_url,
            &config.org_config_url,
            config.key_fetch_timeout,
        )
    }

    fn url_for(&self, variant: ProviderVariant) -> &str {
        match variant {
            ProviderVariant::Com => &self.com_url,
            ProviderVariant::Org => &self.org_url,
        }
    }
}

#[async_trait]
impl PublicKeySource for TravisKeyFetcher {
    async fn fetch(&self, variant: ProviderVariant) -> Result<String, KeyFetchError> {
        let url = self.url_for(variant);

        debug!(provider = variant.as_str(), url = %url, "Fetching Travis CI public key");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| KeyFetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(provider = variant.as_str(), status = %status, "Travis CI config request failed");
            return Err(KeyFetchError::Protocol(format!("config endpoint returned {status}")));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                KeyFetchError::from_reqwest(url, e)
            } else {
                KeyFetchError::Protocol(format!("config response is not JSON: {e}"))
            }
        })?;

        extract_public_key(&body)
    }
}

/// Read `config.notifications.webhook.public_key` from a config response.
pub fn extract_public_key(body: &Value) -> Result<String, KeyFetchError> {
    body.pointer("/config/notifications/webhook/public_key")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            KeyFetchError::Protocol(
                "config.notifications.webhook.public_key missing from response".to_string(),
            )
        })
}
