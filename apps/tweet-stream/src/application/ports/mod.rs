//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: issues the streaming request and yields the response body
//!   as a byte stream that can be aborted at any time.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Method, StatusCode, Url};

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by a transport while connecting or reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// Reading the response body failed.
    #[error("body read failed: {0}")]
    Body(String),

    /// A single line grew past the configured limit.
    #[error("line exceeded {limit} bytes without a newline")]
    LineTooLong {
        /// Configured maximum line length.
        limit: usize,
    },

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

// =============================================================================
// Request
// =============================================================================

/// An authenticated streaming request.
///
/// Parameters are sent as the query string for `GET` requests and as a
/// form-encoded body otherwise.
#[derive(Clone)]
pub struct StreamRequest {
    /// HTTP method.
    pub method: Method,
    /// Endpoint URL.
    pub url: Url,
    /// Query or form parameters, in order.
    pub params: Vec<(String, String)>,
    /// Extra request headers (authorization, user agent, ...).
    pub headers: Vec<(String, String)>,
}

impl StreamRequest {
    /// Create a request with no parameters.
    #[must_use]
    pub const fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Create a `GET` request.
    #[must_use]
    pub const fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a `POST` request.
    #[must_use]
    pub const fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add an `Authorization: Bearer` header.
    #[must_use]
    pub fn bearer_auth(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    /// Whether parameters belong in the query string.
    #[must_use]
    pub fn params_in_query(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::DELETE)
    }
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, _)| (name.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("StreamRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("params", &self.params)
            .field("headers", &headers)
            .finish()
    }
}

// =============================================================================
// Response
// =============================================================================

/// Boxed byte stream backing a response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Response to a streaming request.
#[derive(Debug)]
pub struct StreamResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Parsed `Retry-After` header, if any.
    pub retry_after: Option<Duration>,
    /// The response body.
    pub body: ResponseBody,
}

impl StreamResponse {
    /// Create a response without a `Retry-After` hint.
    #[must_use]
    pub const fn new(status: StatusCode, body: ResponseBody) -> Self {
        Self {
            status,
            retry_after: None,
            body,
        }
    }
}

/// A response body that is read chunk by chunk and can be aborted.
///
/// Aborting drops the underlying byte stream, which closes the connection
/// it was reading from.
pub struct ResponseBody {
    inner: ByteStream,
}

impl ResponseBody {
    /// Wrap a byte stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A body that ends immediately.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// A body made of the given chunks, ending after the last one.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Bytes> = chunks.into_iter().map(Into::into).collect();
        Self::new(futures::stream::iter(chunks.into_iter().map(Ok)))
    }

    /// Read the next chunk. `None` marks the end of the body.
    ///
    /// Cancel safe: dropping the returned future loses no data.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.inner.next().await
    }

    /// Read up to `limit` bytes of the body as lossy UTF-8.
    pub async fn read_prefix(mut self, limit: usize) -> String {
        let mut collected = Vec::new();
        while collected.len() < limit {
            match self.next_chunk().await {
                Some(Ok(chunk)) => collected.extend_from_slice(&chunk),
                Some(Err(_)) | None => break,
            }
        }
        collected.truncate(limit);
        String::from_utf8_lossy(&collected).trim().to_string()
    }

    /// Abort the body, closing the connection it reads from.
    pub fn abort(self) {
        drop(self.inner);
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}

// =============================================================================
// Transport
// =============================================================================

/// HTTP round-trip capability used by the streaming core.
///
/// The core depends only on this trait, so tests can substitute a double or
/// rewrite requests without touching the connection logic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the response head with a streaming body.
    async fn round_trip(&self, request: &StreamRequest) -> Result<StreamResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(&self, request: &StreamRequest) -> Result<StreamResponse, TransportError> {
        (**self).round_trip(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://stream.example.com/1.1/statuses/filter.json").unwrap()
    }

    #[test]
    fn get_params_go_in_query() {
        let request = StreamRequest::get(url()).param("track", "rust");
        assert!(request.params_in_query());
        assert_eq!(request.params, vec![("track".into(), "rust".into())]);
    }

    #[test]
    fn post_params_go_in_form() {
        let request = StreamRequest::post(url()).param("follow", "12");
        assert!(!request.params_in_query());
    }

    #[test]
    fn debug_redacts_header_values() {
        let request = StreamRequest::get(url()).bearer_auth("secret-token");
        let debug = format!("{request:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("Authorization"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn body_yields_chunks_in_order() {
        let mut body = ResponseBody::from_chunks(["a", "b"]);
        assert_eq!(body.next_chunk().await, Some(Ok(Bytes::from("a"))));
        assert_eq!(body.next_chunk().await, Some(Ok(Bytes::from("b"))));
        assert_eq!(body.next_chunk().await, None);
    }

    #[tokio::test]
    async fn read_prefix_truncates() {
        let body = ResponseBody::from_chunks(["unauthorized ", "request body"]);
        assert_eq!(body.read_prefix(12).await, "unauthorized");
    }

    #[tokio::test]
    async fn empty_body_ends_immediately() {
        let mut body = ResponseBody::empty();
        assert!(body.next_chunk().await.is_none());
    }
}
