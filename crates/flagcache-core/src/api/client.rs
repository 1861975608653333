//! HTTP client for the feature flag authority.
//!
//! Endpoints:
//! - `GET  /feature-flags`
//! - `GET  /feature-flags/{name}`
//! - `POST /feature-flags/check`
//! - `GET  /feature-flags/{name}/user/{user_id}`

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{FlagError, FlagFetcher};
use crate::models::{
    normalize_flag_list, CheckResponse, EnabledResponse, FeatureFlag, FlagListResponse,
};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const FLAGS_PATH: &str = "feature-flags";

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    names: &'a [String],
}

/// Client for the flag authority.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct FlagClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl FlagClient {
    /// Create a client for `base_url` with the default timeout
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid flag authority URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("Flag authority URL cannot be used as a base: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new FlagClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FlagError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FlagError::Protocol(format!("cannot build URL from {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, FlagError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| FlagError::Unauthorized)?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check status and decode the body. `flag` is set for per-name endpoints.
    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        flag: Option<&str>,
    ) -> Result<T, FlagError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FlagError::from_status(status, &body, flag));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(FlagError::from)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, flag: Option<&str>) -> Result<T, FlagError> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.auth_headers()?)
            .send()
            .await?;
        Self::read_json(response, flag).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, url: Url, body: &B) -> Result<T, FlagError> {
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(url)
            .headers(self.auth_headers()?)
            .json(body)
            .send()
            .await?;
        Self::read_json(response, None).await
    }
}

#[async_trait]
impl FlagFetcher for FlagClient {
    async fn fetch_all(&self) -> Result<Vec<FeatureFlag>, FlagError> {
        let url = self.endpoint(&[FLAGS_PATH])?;
        let response: FlagListResponse = self.get(url, None).await?;
        let flags = normalize_flag_list(response)?;
        debug!(count = flags.len(), "Fetched feature flags");
        Ok(flags)
    }

    async fn fetch_named(&self, names: &[String]) -> Result<HashMap<String, bool>, FlagError> {
        let url = self.endpoint(&[FLAGS_PATH, "check"])?;
        let response: CheckResponse = self.post(url, &CheckRequest { names }).await?;
        Ok(response.data)
    }

    async fn fetch_one(&self, name: &str) -> Result<bool, FlagError> {
        let url = self.endpoint(&[FLAGS_PATH, name])?;
        let response: EnabledResponse = self.get(url, Some(name)).await?;
        Ok(response.data.enabled)
    }

    async fn fetch_for_user(&self, name: &str, user_id: &str) -> Result<bool, FlagError> {
        let url = self.endpoint(&[FLAGS_PATH, name, "user", user_id])?;
        let response: EnabledResponse = self.get(url, Some(name)).await?;
        Ok(response.data.enabled)
    }
}

// ============================================================================
// Tests
// ============================================================================
