//! HTTP Transports
//!
//! [`ReqwestTransport`] is the production [`Transport`]. It applies only a
//! TCP connect timeout: the response body is expected to stay open for
//! hours, and the connection manager bounds the wait for the response head
//! and watches the body for stalls itself.
//!
//! [`RewriteTransport`] downgrades `https` URLs to `http` before delegating,
//! so production URLs can be pointed at a plain-text local server.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Proxy};

use crate::application::ports::{
    ResponseBody, StreamRequest, StreamResponse, Transport, TransportError,
};
use crate::infrastructure::config::StreamConfig;

const USER_AGENT: &str = concat!("tweet-stream/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Reqwest Transport
// =============================================================================

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: &StreamConfig) -> Result<Self, TransportError> {
        let client = Self::builder(config)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Build a client that sends every request through `proxy_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the client cannot be
    /// built.
    pub fn with_proxy(config: &StreamConfig, proxy_url: &str) -> Result<Self, TransportError> {
        let proxy =
            Proxy::all(proxy_url).map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let client = Self::builder(config)
            .proxy(proxy)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn builder(config: &StreamConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .tcp_keepalive(Duration::from_secs(30))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: &StreamRequest) -> Result<StreamResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            builder = if request.params_in_query() {
                builder.query(&request.params)
            } else {
                builder.form(&request.params)
            };
        }

        let response = builder.send().await.map_err(map_send_error)?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        tracing::debug!(status = status.as_u16(), ?retry_after, "Response received");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Body(e.to_string())));

        Ok(StreamResponse {
            status,
            retry_after,
            body: ResponseBody::new(body),
        })
    }
}

fn map_send_error(error: reqwest::Error) -> TransportError {
    if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(error.to_string())
    }
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// The HTTP-date form is ignored.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// =============================================================================
// Scheme Rewrite
// =============================================================================

/// Forces the `http` scheme on every request before delegating.
#[derive(Debug, Clone)]
pub struct RewriteTransport<T> {
    inner: T,
}

impl<T> RewriteTransport<T> {
    /// Wrap `inner`.
    #[must_use]
    pub const fn new(inner: T) -> Self {
        Self { inner }
    }

    /// The wrapped transport.
    #[must_use]
    pub const fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RewriteTransport<T> {
    async fn round_trip(&self, request: &StreamRequest) -> Result<StreamResponse, TransportError> {
        if request.url.scheme() != "https" {
            return self.inner.round_trip(request).await;
        }

        let mut rewritten = request.clone();
        rewritten
            .url
            .set_scheme("http")
            .map_err(|()| TransportError::InvalidRequest(format!("cannot rewrite {}", request.url)))?;
        self.inner.round_trip(&rewritten).await
    }
}
