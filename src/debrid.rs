//! Debrid link resolution
//!
//! A debrid service turns a hoster link into a direct download URL. Only the
//! "given a URL, return a resolved URL or an error" contract is modelled;
//! vendor specifics live behind the configured endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DebridConfig;
use crate::error::{Error, Result};

/// Resolves links through a debrid service
#[async_trait]
pub trait DebridResolver: Send + Sync {
    /// Resolve `url` to a direct download URL
    async fn resolve(&self, url: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ResolveRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResolveResponse {
    Resolved { url: String },
    Rejected { error: String },
}

/// Resolver posting `{"url": ...}` to an HTTP endpoint
///
/// The endpoint answers `{"url": "<direct link>"}` or `{"error": "<reason>"}`.
#[derive(Clone, Debug)]
pub struct HttpDebridResolver {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpDebridResolver {
    /// Build a resolver from configuration
    pub fn new(config: &DebridConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Debrid(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl DebridResolver for HttpDebridResolver {
    async fn resolve(&self, url: &str) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&ResolveRequest { url });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Debrid(format!("timeout resolving '{}'", url))
            } else {
                Error::Network(e)
            }
        })?;

        let status = response.status();
        let body: Option<ResolveResponse> = response.json().await.ok();

        match (status.is_success(), body) {
            (true, Some(ResolveResponse::Resolved { url: resolved })) => {
                tracing::info!(url, resolved = %resolved, "Resolved debrid link");
                Ok(resolved)
            }
            (success, Some(ResolveResponse::Rejected { error })) => {
                let reason = if success {
                    error
                } else {
                    format!("HTTP {}: {}", status, error)
                };
                tracing::warn!(url, reason = %reason, "Debrid service rejected link");
                Err(Error::Debrid(reason))
            }
            _ => {
                tracing::warn!(url, %status, "Unreadable debrid response");
                Err(Error::Debrid(format!("unexpected response (HTTP {})", status)))
            }
        }
    }
}
