//! HTTP plumbing shared by the registry clients.
//!
//! Wraps reqwest with:
//! - Per-platform error mapping (404, other statuses, send failures)
//! - Bearer token injection
//! - Retry of transient failures

use super::Platform;
use crate::config::RegistryConfig;
use crate::error::{ModelprintError, Result};
use crate::network::{retry_transient, RetryConfig};
use bytes::Bytes;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Longest response body excerpt carried in a provider error.
const ERROR_BODY_EXCERPT: usize = 200;

/// HTTP client bound to one registry.
#[derive(Clone)]
pub(crate) struct RegistryHttp {
    client: Client,
    platform: Platform,
    base_url: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl std::fmt::Debug for RegistryHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHttp")
            .field("platform", &self.platform)
            .field("base_url", &self.base_url)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

/// Downloaded body plus its declared content type.
#[derive(Debug, Clone)]
pub(crate) struct Fetched {
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl RegistryHttp {
    pub fn new(
        platform: Platform,
        base_url: &str,
        token: Option<String>,
        config: &RegistryConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ModelprintError::Config {
                message: format!("Failed to create HTTP client for {}: {}", platform, e),
            })?;

        Ok(Self {
            client,
            platform,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            retry: config.retry(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base_url}{path}` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let label = format!("GET {}", url);
        let (this, url) = (self, url.as_str());

        retry_transient(&self.retry, &label, move || async move {
            let response = this.send(url, true).await?;
            response.json::<T>().await.map_err(|e| {
                if e.is_decode() {
                    ModelprintError::Provider {
                        platform: this.platform,
                        status: StatusCode::OK.as_u16(),
                        message: format!("Unexpected response shape: {}", e),
                    }
                } else {
                    ModelprintError::transport(this.platform, e)
                }
            })
        })
        .await
    }

    /// GET an absolute URL and return the raw body. No auth header is sent
    /// since preview images are usually served from a CDN.
    pub async fn get_bytes(&self, url: &str) -> Result<Fetched> {
        let label = format!("GET {}", url);
        let this = self;

        retry_transient(&self.retry, &label, move || async move {
            let response = this.send(url, false).await?;
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let data = response
                .bytes()
                .await
                .map_err(|e| ModelprintError::transport(this.platform, e))?;
            Ok(Fetched { content_type, data })
        })
        .await
    }

    async fn send(&self, url: &str, with_auth: bool) -> Result<Response> {
        let mut request = self.client.get(url);
        if with_auth {
            if let Some(token) = &self.token {
                request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
        }

        debug!("{} GET {}", self.platform, url);
        let response = request
            .send()
            .await
            .map_err(|e| ModelprintError::transport(self.platform, e))?;

        self.check_status(response).await
    }

    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ModelprintError::NotFound {
                platform: self.platform,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
        Err(ModelprintError::Provider {
            platform: self.platform,
            status: status.as_u16(),
            message: if excerpt.is_empty() {
                status.canonical_reason().unwrap_or("error").to_string()
            } else {
                excerpt
            },
        })
    }
}
