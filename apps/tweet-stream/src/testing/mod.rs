//! Test Support
//!
//! A local streaming endpoint plus assertions for exercising consumers
//! without network access.
//!
//! [`TestServer`] serves an axum [`Router`] on a loopback port. Its
//! [`transport`](TestServer::transport) sends every request to that port
//! through an HTTP proxy hop, after downgrading `https` to `http`, so code
//! written against the production URL runs unchanged.
//!
//! ```ignore
//! let server = TestServer::with_handlers([(
//!     "/1.1/statuses/sample.json",
//!     get(|| async { stream_body(["{\"id\":1}\r\n"], false) }),
//! )])
//! .await?;
//! let mut stream = open_stream(server.transport()?, request, config);
//! let messages = assert_closed(&mut stream, Duration::from_secs(5)).await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::response::Response;
use axum::routing::MethodRouter;
use futures::StreamExt;
use reqwest::Url;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::application::ports::{Transport, TransportError};
use crate::domain::message::Message;
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::http::{ReqwestTransport, RewriteTransport};
use crate::infrastructure::twitter::{StopHandle, Stream};

/// A streaming endpoint on a loopback port. Shut down on drop.
#[derive(Debug)]
pub struct TestServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Serve `router` on an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error if no loopback port can be bound.
    pub async fn start(router: Router) -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Test server failed");
            }
        });
        tracing::debug!(%addr, "Test server listening");

        Ok(Self { addr, task })
    }

    /// Serve one handler per path.
    ///
    /// # Errors
    ///
    /// Returns an error if no loopback port can be bound.
    pub async fn with_handlers<I, P>(handlers: I) -> std::io::Result<Self>
    where
        I: IntoIterator<Item = (P, MethodRouter)>,
        P: AsRef<str>,
    {
        let router = handlers
            .into_iter()
            .fold(Router::new(), |router, (path, handler)| router.route(path.as_ref(), handler));
        Self::start(router).await
    }

    /// Bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the server, for requests made directly against it.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).expect("socket address forms a valid URL")
    }

    /// A transport that routes every request to this server.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let proxied = ReqwestTransport::with_proxy(&StreamConfig::default(), self.url().as_str())?;
        Ok(Arc::new(RewriteTransport::new(proxied)))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Build a chunked response body sending `chunks` in order.
///
/// With `hold_open` the body never ends after the last chunk, like a live
/// stream between keep-alives.
pub fn stream_body<I>(chunks: I, hold_open: bool) -> Response
where
    I: IntoIterator<Item = &'static str>,
    I::IntoIter: Send + 'static,
{
    let chunks = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    let body = if hold_open {
        Body::from_stream(chunks.chain(futures::stream::pending()))
    } else {
        Body::from_stream(chunks)
    };
    Response::new(body)
}

/// Wait for `stream` to close, returning everything still delivered.
///
/// # Panics
///
/// Panics if the stream stays open past `timeout`.
pub async fn assert_closed(stream: &mut Stream, timeout: Duration) -> Vec<Message> {
    let drain = async {
        let mut messages = Vec::new();
        while let Some(message) = stream.recv().await {
            messages.push(message);
        }
        messages
    };
    match tokio::time::timeout(timeout, drain).await {
        Ok(messages) => messages,
        Err(_) => panic!("stream did not close within {timeout:?}"),
    }
}

/// Stop through `handle` and wait for the background task to exit.
///
/// # Panics
///
/// Panics if shutdown takes longer than `timeout`.
pub async fn assert_stopped(handle: &StopHandle, timeout: Duration) {
    if tokio::time::timeout(timeout, handle.stop()).await.is_err() {
        panic!("stream did not stop within {timeout:?}");
    }
    assert!(handle.is_finished(), "stream task still running after stop");
}
