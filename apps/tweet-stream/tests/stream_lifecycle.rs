//! Stream Lifecycle Integration Tests
//!
//! Runs full streams against a local endpoint: delivery order, fatal
//! responses, malformed lines and every shutdown path.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use reqwest::Url;
use serde_json::json;
use tokio::sync::mpsc;

use tweet_stream::testing::{TestServer, assert_closed, assert_stopped, stream_body};
use tweet_stream::{
    BackoffSettings, Message, StreamConfig, StreamError, StreamRequest, Termination, open_stream,
};

const SAMPLE_PATH: &str = "/1.1/statuses/sample.json";
const WAIT: Duration = Duration::from_secs(5);

fn request() -> StreamRequest {
    StreamRequest::get(Url::parse(&format!("https://stream.twitter.com{SAMPLE_PATH}")).unwrap())
        .bearer_auth("test-token")
}

fn fast_config() -> StreamConfig {
    StreamConfig {
        backoff: BackoffSettings {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter_factor: 0.0,
            ..BackoffSettings::transient()
        },
        ..StreamConfig::default()
    }
}

fn id(n: i64) -> Message {
    Message::Other(json!({"id": n}))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

/// Serves `first` on the first request and 401 afterwards.
async fn serve_once(first: &'static [&'static str], hold_open: bool) -> (TestServer, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handler = get(move || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                stream_body(first.iter().copied(), hold_open)
            } else {
                unauthorized()
            }
        }
    });
    let server = TestServer::with_handlers([(SAMPLE_PATH, handler)]).await.unwrap();
    (server, hits)
}

#[tokio::test]
async fn delivers_lines_in_order_then_closes() {
    let (server, hits) = serve_once(&["{\"id\":1}\r\n", "\r\n", "{\"id\":2}\r\n"], false).await;

    let mut stream = open_stream(server.transport().unwrap(), request(), fast_config());
    let messages = assert_closed(&mut stream, WAIT).await;

    assert_eq!(messages, vec![id(1), id(2)]);
    assert_eq!(hits.load(Ordering::SeqCst), 2, "EOF should reconnect once");
    assert!(matches!(
        stream.termination(),
        Some(Termination::Failed(StreamError::Rejected { status: 401, .. }))
    ));
}

#[tokio::test]
async fn unauthorized_closes_without_retry() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handler = get(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { unauthorized() }
    });
    let server = TestServer::with_handlers([(SAMPLE_PATH, handler)]).await.unwrap();

    let mut stream = open_stream(server.transport().unwrap(), request(), fast_config());
    let messages = assert_closed(&mut stream, WAIT).await;

    assert!(messages.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let Some(Termination::Failed(StreamError::Rejected { status, body })) = stream.termination() else {
        panic!("expected rejection");
    };
    assert_eq!(status, 401);
    assert_eq!(body, "Unauthorized");
}

#[tokio::test]
async fn server_error_is_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handler = get(move || {
        let counter = Arc::clone(&counter);
        async move {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
                1 => stream_body(["{\"id\":7}\n"], true),
                _ => unauthorized(),
            }
        }
    });
    let server = TestServer::with_handlers([(SAMPLE_PATH, handler)]).await.unwrap();

    let mut stream = open_stream(server.transport().unwrap(), request(), fast_config());

    assert_eq!(tokio::time::timeout(WAIT, stream.recv()).await.unwrap(), Some(id(7)));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_stopped(&stream.stop_handle(), WAIT).await;
}

#[tokio::test]
async fn malformed_line_does_not_end_stream() {
    let (server, _hits) = serve_once(&["{\"id\":1}\n{broken\n{\"id\":2}\n"], true).await;

    let mut stream = open_stream(server.transport().unwrap(), request(), fast_config());

    assert_eq!(stream.recv().await, Some(id(1)));
    let malformed = stream.recv().await.unwrap();
    let Message::Malformed(line) = malformed else {
        panic!("expected malformed message, got {malformed:?}");
    };
    assert_eq!(line.line, "{broken");
    assert_eq!(stream.recv().await, Some(id(2)));

    assert_stopped(&stream.stop_handle(), WAIT).await;
    assert_eq!(stream.termination(), Some(Termination::Stopped));
}

#[tokio::test]
async fn stop_mid_stream_closes_queue() {
    let (server, _hits) = serve_once(&["{\"id\":1}\r\n", "\r\n"], true).await;

    let mut stream = open_stream(server.transport().unwrap(), request(), fast_config());
    assert_eq!(stream.recv().await, Some(id(1)));

    assert_stopped(&stream.stop_handle(), WAIT).await;

    assert_eq!(stream.recv().await, None);
    assert_eq!(stream.termination(), Some(Termination::Stopped));
}

#[tokio::test]
async fn stop_before_response_arrives() {
    let handler = get(|| std::future::pending::<Response>());
    let server = TestServer::with_handlers([(SAMPLE_PATH, handler)]).await.unwrap();

    let mut stream = open_stream(server.transport().unwrap(), request(), fast_config());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_stopped(&stream.stop_handle(), WAIT).await;
    assert!(assert_closed(&mut stream, WAIT).await.is_empty());
    assert_eq!(stream.termination(), Some(Termination::Stopped));
}

#[tokio::test]
async fn concurrent_stops_are_safe() {
    let (server, _hits) = serve_once(&["{\"id\":1}\n"], true).await;
    let stream = open_stream(server.transport().unwrap(), request(), fast_config());

    let first = stream.stop_handle();
    let second = stream.stop_handle();
    let (a, b) = tokio::join!(
        tokio::time::timeout(WAIT, first.stop()),
        tokio::time::timeout(WAIT, second.stop()),
    );

    assert!(a.is_ok() && b.is_ok());
    assert!(stream.is_finished());
    stream.stop().await;
}

#[tokio::test]
async fn stop_after_termination_returns() {
    let handler = get(|| async { unauthorized() });
    let server = TestServer::with_handlers([(SAMPLE_PATH, handler)]).await.unwrap();

    let mut stream = open_stream(server.transport().unwrap(), request(), fast_config());
    assert!(assert_closed(&mut stream, WAIT).await.is_empty());

    assert_stopped(&stream.stop_handle(), WAIT).await;
    assert!(matches!(stream.termination(), Some(Termination::Failed(_))));
}

#[tokio::test]
async fn slow_consumer_can_still_stop() {
    let (server, _hits) = serve_once(&["{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n{\"id\":4}\n"], true).await;
    let config = StreamConfig {
        queue_capacity: 1,
        ..fast_config()
    };

    let stream = open_stream(server.transport().unwrap(), request(), config);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_stopped(&stream.stop_handle(), WAIT).await;
}

#[tokio::test]
async fn test_stream_from_receiver() {
    let (tx, rx) = mpsc::channel(8);
    let mut stream = tweet_stream::Stream::from_receiver(rx, 8);

    tx.send(id(1)).await.unwrap();
    tx.send(id(2)).await.unwrap();
    drop(tx);

    assert_eq!(assert_closed(&mut stream, WAIT).await, vec![id(1), id(2)]);
    assert_stopped(&stream.stop_handle(), WAIT).await;
    assert_eq!(stream.termination(), Some(Termination::Closed));
}
