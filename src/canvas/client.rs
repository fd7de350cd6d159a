//! Authenticated Canvas REST client with rate-limit handling.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::{ApiConfig, Config, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;

use super::models::UserProfile;

/// Cloneable Canvas API client
///
/// All clones share one connection pool and one admission gate, so the
/// number of requests in flight across every worker never exceeds
/// `api.max_in_flight_requests`.
#[derive(Clone)]
pub struct CanvasClient {
    http: reqwest::Client,
    base_url: Arc<str>,
    token: Arc<str>,
    gate: Arc<Semaphore>,
    api: ApiConfig,
    retry: RetryConfig,
}

impl std::fmt::Debug for CanvasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasClient")
            .field("base_url", &self.base_url)
            .field("available_permits", &self.gate.available_permits())
            .finish_non_exhaustive()
    }
}

impl CanvasClient {
    /// Create a client from a validated configuration
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let token = config.api_token()?;

        let http = reqwest::Client::builder()
            .timeout(config.api.request_timeout)
            .user_agent(concat!("canvas-backup/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: Arc::from(config.canvas.base_url()),
            token: Arc::from(token),
            gate: Arc::new(Semaphore::new(config.api.max_in_flight_requests)),
            api: config.api.clone(),
            retry: config.retry.clone(),
        })
    }

    /// Base URL of the Canvas instance, without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Turn an absolute URL on this instance into an endpoint path
    ///
    /// URLs that do not start with the configured base URL are returned unchanged.
    pub fn strip_base_url<'a>(&self, url: &'a str) -> &'a str {
        match url.strip_prefix(self.base_url()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => url,
        }
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// GET an endpoint and decode the JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.get_json_with(endpoint, &[]).await
    }

    /// GET an endpoint with query parameters and decode the JSON response
    pub async fn get_json_with<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let value = self.request(Method::GET, endpoint, params, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// POST a JSON body to an endpoint and decode the JSON response
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let value = self
            .request(Method::POST, endpoint, &[], Some(&body))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Issue a request and return the decoded JSON body
    ///
    /// HTTP 429 is retried after `Retry-After` (or `api.rate_limit_delay`)
    /// for as long as the server keeps rate limiting. Transient transport
    /// failures are retried per `retry` for idempotent methods only; a POST
    /// that timed out may still have been applied. Any other non-2xx status
    /// fails with [`Error::Http`]. An empty body decodes to `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        if !method.is_idempotent() {
            return self.send_once(method, endpoint, params, body).await;
        }
        with_retry(&self.retry, || {
            self.send_once(method.clone(), endpoint, params, body)
        })
        .await
    }

    async fn send_once(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.url_for(endpoint);

        loop {
            if !self.api.courtesy_delay.is_zero() {
                tokio::time::sleep(self.api.courtesy_delay).await;
            }

            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| Error::Other("request gate closed".to_string()))?;

            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&*self.token);
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let delay = retry_after(response.headers()).unwrap_or(self.api.rate_limit_delay);
                drop(permit);
                tracing::warn!(
                    endpoint = %endpoint,
                    delay_ms = delay.as_millis(),
                    "Rate limit reached, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                tracing::debug!(endpoint = %endpoint, status = status.as_u16(), "API request failed");
                return Err(Error::Http {
                    status: status.as_u16(),
                    endpoint: endpoint.to_string(),
                });
            }

            let bytes = response.bytes().await?;
            drop(permit);

            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_slice(&bytes)?);
        }
    }

    /// Check the token against `/api/v1/users/self`
    ///
    /// A 401 or 403 becomes [`Error::Auth`]; other failures propagate unchanged.
    pub async fn validate_token(&self) -> Result<UserProfile> {
        match self.get_json::<UserProfile>("/api/v1/users/self").await {
            Ok(user) => {
                tracing::info!(
                    name = user.name.as_deref().unwrap_or("unknown"),
                    email = user.email().unwrap_or("unknown"),
                    "Token validated"
                );
                Ok(user)
            }
            Err(Error::Http { status, .. }) if status == 401 || status == 403 => {
                tracing::error!(status, "Token validation failed");
                Err(Error::Auth(format!(
                    "the server rejected the API token (HTTP {})",
                    status
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Check that the base URL answers like a Canvas instance
    ///
    /// Any HTTP answer below 500 (including 401/403) proves reachability;
    /// transport failures and server errors do not.
    pub async fn probe_base_url(&self) -> Result<()> {
        match self
            .request(Method::GET, "/api/v1/accounts", &[], None)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Http { status, .. }) if status < 500 => {
                tracing::debug!(status, "Base URL reachable");
                Ok(())
            }
            Err(e) => {
                tracing::error!(base_url = %self.base_url, error = %e, "Base URL unreachable");
                Err(e)
            }
        }
    }
}

/// Parse `Retry-After` as delay seconds (fractional values accepted)
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
