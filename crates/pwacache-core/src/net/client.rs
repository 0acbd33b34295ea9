//! HTTP fetcher backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use tracing::debug;
use url::{Origin, Url};

use super::types::{Headers, Request, Response, ResponseKind};
use super::{FetchMode, Fetcher};
use crate::error::NetworkError;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fetcher for a single application scope.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Origin,
}

impl HttpFetcher {
    /// Create a fetcher that classifies responses relative to `scope`'s origin.
    pub fn new(scope: &Url) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            origin: scope.origin(),
        })
    }

    fn classify(&self, final_url: &Url) -> ResponseKind {
        if final_url.origin() == self.origin {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request, mode: FetchMode) -> Result<Response, NetworkError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| NetworkError::InvalidRequest(format!("method {}", request.method)))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if mode == FetchMode::NoCache {
            builder = builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache");
        }

        let response = builder.send().await?;
        let status = response.status();
        let kind = self.classify(response.url());

        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await?.to_vec();
        debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "Fetched");

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            kind,
            from_cache: false,
        })
    }
}
