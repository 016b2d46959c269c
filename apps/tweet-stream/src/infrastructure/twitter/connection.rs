//! Connection Manager
//!
//! Owns the long-lived request: connects through the [`Transport`],
//! classifies the response, drives a [`Decoder`] over the body and forwards
//! messages into the delivery queue. Transient failures reconnect after a
//! backoff; only a fatal response or exhausted retries end the loop.
//!
//! Every suspension point (connect, body read, queue send, backoff wait)
//! races the stop signal, and a stopped session aborts its body so the
//! connection is closed rather than abandoned.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::codec::{Decoder, Frame, StreamEnd};
use super::reconnect::{ReconnectSchedule, Schedule};
use super::stall::StallDetector;
use super::stop::StopSignal;
use super::stream::{StreamError, Termination};
use crate::application::ports::{ResponseBody, StreamRequest, Transport, TransportError};
use crate::domain::message::Message;
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::metrics;

/// Bytes of a rejected response body kept for the terminal error.
const REJECTION_BODY_LIMIT: usize = 512;

// =============================================================================
// Status Classification
// =============================================================================

/// How a response status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx: read the body.
    Success,
    /// 420/429: retry on the rate-limit schedule.
    RateLimited,
    /// 5xx: retry on the transient schedule.
    ServerError,
    /// Anything else: give up.
    Fatal,
}

/// Classify a response status.
#[must_use]
pub const fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        200..=299 => StatusClass::Success,
        420 | 429 => StatusClass::RateLimited,
        500..=599 => StatusClass::ServerError,
        _ => StatusClass::Fatal,
    }
}

// =============================================================================
// Disconnect Reasons
// =============================================================================

/// Why a connection attempt or session ended with a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Disconnect {
    /// The request could not be sent.
    #[error("network error: {0}")]
    Network(TransportError),
    /// No response head within the connect timeout.
    #[error("no response within {0:?}")]
    ConnectTimeout(Duration),
    /// The server answered 5xx.
    #[error("server error: HTTP {0}")]
    ServerError(u16),
    /// The server answered 420/429.
    #[error("rate limited: HTTP {status}")]
    RateLimited {
        /// Response status.
        status: u16,
        /// `Retry-After` hint.
        retry_after: Option<Duration>,
    },
    /// Nothing arrived within the stall window.
    #[error("no data received for {0:?}")]
    Stalled(Duration),
    /// The server closed the body.
    #[error("connection closed by server")]
    Eof,
    /// Reading the body failed.
    #[error("read error: {0}")]
    ReadError(TransportError),
}

impl Disconnect {
    /// Schedule the next delay is drawn from.
    #[must_use]
    pub const fn schedule(&self) -> Schedule {
        match self {
            Self::RateLimited { .. } => Schedule::RateLimit,
            _ => Schedule::Transient,
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::ServerError(_) => "server_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::Stalled(_) => "stalled",
            Self::Eof => "eof",
            Self::ReadError(_) => "read_error",
        }
    }

    /// Minimum wait requested by the server, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Outcome of one connection attempt.
enum Connect {
    Established(ResponseBody),
    Retry(Disconnect),
    Fatal(StreamError),
    Stopped,
}

/// Outcome of one connected session.
enum SessionEnd {
    Disconnected(Disconnect),
    ReceiverDropped,
    Stopped,
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Drives connect, decode and reconnect until stopped or failed.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    request: StreamRequest,
    config: StreamConfig,
    stop: StopSignal,
}

impl ConnectionManager {
    /// Create a manager. Nothing happens until [`run`](Self::run).
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        request: StreamRequest,
        config: StreamConfig,
        stop: StopSignal,
    ) -> Self {
        Self {
            transport,
            request,
            config,
            stop,
        }
    }

    /// Run the connection loop, forwarding messages into `messages`.
    ///
    /// Consumes `messages`; the queue closes once every other sender is gone.
    pub async fn run(self, messages: mpsc::Sender<Message>) -> Termination {
        let mut schedule =
            ReconnectSchedule::new(self.config.backoff.clone(), self.config.rate_limit.clone());

        loop {
            if self.stop.is_stopped() {
                return Termination::Stopped;
            }

            let disconnect = match self.connect().await {
                Connect::Established(body) => {
                    schedule.reset();
                    match self.consume(body, &messages).await {
                        SessionEnd::Disconnected(disconnect) => disconnect,
                        SessionEnd::ReceiverDropped => return Termination::ReceiverDropped,
                        SessionEnd::Stopped => return Termination::Stopped,
                    }
                }
                Connect::Retry(disconnect) => disconnect,
                Connect::Fatal(error) => return Termination::Failed(error),
                Connect::Stopped => return Termination::Stopped,
            };

            let which = disconnect.schedule();
            let Some(delay) = schedule.next_delay(which) else {
                let attempts = schedule.attempt_count(which);
                tracing::error!(
                    attempts,
                    reason = disconnect.reason(),
                    "Reconnection attempts exhausted"
                );
                return Termination::Failed(StreamError::RetriesExhausted {
                    attempts,
                    last_failure: disconnect.to_string(),
                });
            };
            let delay = disconnect.retry_after().map_or(delay, |hint| delay.max(hint));

            metrics::record_reconnect(disconnect.reason());
            tracing::warn!(
                reason = disconnect.reason(),
                error = %disconnect,
                attempt = schedule.attempt_count(which),
                delay_ms = delay.as_millis(),
                "Reconnecting to stream"
            );

            tokio::select! {
                biased;
                () = self.stop.stopped() => {
                    tracing::debug!("Stopped during reconnect delay");
                    return Termination::Stopped;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Issue the request and classify the response.
    async fn connect(&self) -> Connect {
        tracing::info!(url = %self.request.url, method = %self.request.method, "Connecting to stream");

        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.round_trip(&self.request),
        );
        let outcome = tokio::select! {
            biased;
            () = self.stop.stopped() => return Connect::Stopped,
            outcome = attempt => outcome,
        };

        let response = match outcome {
            Err(_elapsed) => {
                return Connect::Retry(Disconnect::ConnectTimeout(self.config.connect_timeout));
            }
            Ok(Err(e)) => return Connect::Retry(Disconnect::Network(e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status;
        match classify_status(status) {
            StatusClass::Success => {
                tracing::info!(status = status.as_u16(), "Stream connected");
                Connect::Established(response.body)
            }
            StatusClass::RateLimited => {
                response.body.abort();
                Connect::Retry(Disconnect::RateLimited {
                    status: status.as_u16(),
                    retry_after: response.retry_after,
                })
            }
            StatusClass::ServerError => {
                response.body.abort();
                Connect::Retry(Disconnect::ServerError(status.as_u16()))
            }
            StatusClass::Fatal => {
                let read = tokio::time::timeout(
                    self.config.connect_timeout,
                    response.body.read_prefix(REJECTION_BODY_LIMIT),
                );
                let body = tokio::select! {
                    biased;
                    () = self.stop.stopped() => return Connect::Stopped,
                    body = read => body.unwrap_or_default(),
                };

                metrics::record_fatal_error(status.as_u16());
                tracing::error!(status = status.as_u16(), body = %body, "Stream rejected");
                Connect::Fatal(StreamError::Rejected {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Decode the body and forward messages until the session ends.
    async fn consume(&self, body: ResponseBody, messages: &mpsc::Sender<Message>) -> SessionEnd {
        let mut decoder = Decoder::new(body, self.config.max_line_bytes);
        let stall = StallDetector::new(self.config.stall_timeout);
        metrics::set_connected(true);

        // Time spent blocked on a full queue is not server silence.
        let mut resumed = Instant::now();

        let end = loop {
            let idle_since = decoder.last_activity().max(resumed);
            let deadline = stall.deadline(idle_since);
            let frame = tokio::select! {
                biased;
                () = self.stop.stopped() => break SessionEnd::Stopped,
                frame = decoder.next_frame() => frame,
                () = tokio::time::sleep_until(deadline) => {
                    if stall.is_stalled(decoder.last_activity().max(resumed), Instant::now()) {
                        break SessionEnd::Disconnected(Disconnect::Stalled(stall.timeout()));
                    }
                    continue;
                }
            };

            let message = match frame {
                Ok(Frame::Message(message)) => {
                    metrics::record_message_received(message.kind());
                    message
                }
                Ok(Frame::KeepAlive) => {
                    tracing::trace!("Keep-alive received");
                    continue;
                }
                Ok(Frame::Malformed(malformed)) => {
                    metrics::record_decode_error();
                    tracing::warn!(error = %malformed.error, "Skipping malformed line");
                    Message::Malformed(malformed)
                }
                Err(StreamEnd::Eof) => break SessionEnd::Disconnected(Disconnect::Eof),
                Err(StreamEnd::Io(e)) => break SessionEnd::Disconnected(Disconnect::ReadError(e)),
            };

            tokio::select! {
                biased;
                () = self.stop.stopped() => break SessionEnd::Stopped,
                sent = messages.send(message) => {
                    if sent.is_err() {
                        break SessionEnd::ReceiverDropped;
                    }
                    resumed = Instant::now();
                }
            }
        };

        decoder.abort();
        metrics::set_connected(false);
        end
    }
}
