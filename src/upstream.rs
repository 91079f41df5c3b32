//! Outbound HTTP transport.
//!
//! Every network call the engine makes goes through the [`Upstream`]
//! trait so the race, the cache gate and the status page can run against
//! an in-memory double in tests.  [`ReqwestUpstream`] is the production
//! implementation.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A fully constructed outbound request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

impl OutboundRequest {
    /// A `GET` with no headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Builder-style header insertion. Invalid values are dropped.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }
}

/// A buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Async HTTP transport contract.
pub trait Upstream: Send + Sync + 'static {
    /// Send `request` and buffer the full response.
    ///
    /// Non-success statuses are returned as `Ok`; only transport failures
    /// are errors.
    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UpstreamResponse>> + Send + '_>>;
}

/// [`Upstream`] backed by a shared `reqwest` client.
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    /// Build a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client })
    }
}

impl Upstream for ReqwestUpstream {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UpstreamResponse>> + Send + '_>> {
        Box::pin(async move {
            let resp = self
                .client
                .request(request.method, &request.url)
                .headers(request.headers)
                .send()
                .await?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp.bytes().await?;
            Ok(UpstreamResponse {
                status,
                headers,
                body,
            })
        })
    }
}
