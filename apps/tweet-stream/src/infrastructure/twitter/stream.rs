//! Stream Orchestrator
//!
//! The only piece applications touch directly. [`open_stream`] spawns the
//! [`ConnectionManager`] on its own task and hands back a [`Stream`] that
//! reads from the delivery queue.
//!
//! # Shutdown
//!
//! ```text
//! stop() ──► StopSignal ──► manager aborts body ──► task exits
//!                                                      │
//!            queue closed ◄── Sender dropped ◄─────────┤
//!            finished     ◄── drop guard     ◄─────────┘
//! ```
//!
//! The background task owns every `Sender`, so the queue closes exactly
//! once, when the task is gone. The outcome is recorded before the last
//! `Sender` drops, so a consumer that sees the queue close can always read
//! [`Stream::termination`]. The connection loop runs on its own task under
//! a supervisor, so a panic surfaces as [`StreamError::Panicked`].

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::connection::ConnectionManager;
use super::stop::StopSignal;
use crate::application::ports::{StreamRequest, Transport};
use crate::domain::message::Message;
use crate::infrastructure::config::StreamConfig;

// =============================================================================
// Outcomes
// =============================================================================

/// Terminal error of a stream. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The server rejected the request with a non-retryable status.
    #[error("stream rejected with HTTP {status}: {body}")]
    Rejected {
        /// Response status.
        status: u16,
        /// Leading part of the response body.
        body: String,
    },

    /// The configured retry cap was reached.
    #[error("gave up after {attempts} reconnection attempts: {last_failure}")]
    RetriesExhausted {
        /// Attempts made on the exhausted schedule.
        attempts: u32,
        /// Description of the last failure.
        last_failure: String,
    },

    /// The background task panicked.
    #[error("stream task panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `stop()` was called or the `Stream` was dropped.
    Stopped,
    /// An unrecoverable failure ended the stream.
    Failed(StreamError),
    /// The delivery queue's receiver went away.
    ReceiverDropped,
    /// The source of a [`Stream::from_receiver`] stream closed.
    Closed,
}

impl Termination {
    /// The terminal error, if the stream failed.
    #[must_use]
    pub const fn error(&self) -> Option<&StreamError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

// =============================================================================
// Stop Handle
// =============================================================================

/// Cloneable handle that can stop a stream from any task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: StopSignal,
    finished: CancellationToken,
    termination: Arc<OnceLock<Termination>>,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            stop: StopSignal::new(),
            finished: CancellationToken::new(),
            termination: Arc::new(OnceLock::new()),
        }
    }

    /// Stop the stream and wait until its task has exited and the queue
    /// is closed.
    ///
    /// Safe to call any number of times, concurrently, and after the
    /// stream already ended on its own.
    pub async fn stop(&self) {
        if self.stop.stop() {
            tracing::debug!("Stop requested");
        }
        self.finished.cancelled().await;
    }

    /// Fire the stop signal without waiting. Returns `true` for the call
    /// that fired it.
    pub fn request_stop(&self) -> bool {
        self.stop.stop()
    }

    /// Wait until the background task has exited.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Whether the background task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// The terminal outcome, once the task has exited.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        self.termination.get().cloned()
    }
}

// =============================================================================
// Stream
// =============================================================================

/// A running stream of decoded messages.
///
/// Read with [`recv`](Self::recv) or as a [`futures::Stream`]. Dropping it
/// stops the background task.
#[derive(Debug)]
pub struct Stream {
    messages: mpsc::Receiver<Message>,
    handle: StopHandle,
}

impl Stream {
    /// Receive the next message. `None` once the stream has ended and
    /// every buffered message was read.
    pub async fn recv(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    /// Stop the stream and wait for shutdown. See [`StopHandle::stop`].
    pub async fn stop(&self) {
        self.handle.stop().await;
    }

    /// A handle that can stop the stream from elsewhere.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    /// The terminal outcome, once the task has exited.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        self.handle.termination()
    }

    /// Whether the background task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Build a stream fed by `source` instead of a connection.
    ///
    /// Messages are forwarded through a queue of `capacity` with the same
    /// stop semantics as a live stream. The stream ends with
    /// [`Termination::Closed`] when every sender of `source` is dropped.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn from_receiver(mut source: mpsc::Receiver<Message>, capacity: usize) -> Self {
        spawn_stream(capacity, "from_receiver", move |stop, tx| async move {
            loop {
                let message = tokio::select! {
                    biased;
                    () = stop.stopped() => return Termination::Stopped,
                    message = source.recv() => match message {
                        Some(message) => message,
                        None => return Termination::Closed,
                    },
                };
                tokio::select! {
                    biased;
                    () = stop.stopped() => return Termination::Stopped,
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            return Termination::ReceiverDropped;
                        }
                    }
                }
            }
        })
    }
}

impl futures::Stream for Stream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.messages.poll_recv(cx)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.handle.request_stop() {
            tracing::debug!("Stream dropped, stopping background task");
        }
    }
}

/// Open a stream and start connecting in the background.
///
/// Returns immediately; the first connection attempt happens on the
/// spawned task. Must be called from within a tokio runtime.
#[must_use]
pub fn open_stream(
    transport: Arc<dyn Transport>,
    request: StreamRequest,
    config: StreamConfig,
) -> Stream {
    let capacity = config.queue_capacity;
    spawn_stream(capacity, "connection", move |stop, tx| {
        ConnectionManager::new(transport, request, config, stop).run(tx)
    })
}

fn spawn_stream<F, Fut>(capacity: usize, source: &'static str, task: F) -> Stream
where
    F: FnOnce(StopSignal, mpsc::Sender<Message>) -> Fut,
    Fut: Future<Output = Termination> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = StopHandle::new();

    let stream_id = Uuid::new_v4();
    let span = tracing::info_span!("stream", %stream_id, source);
    let queue = tx.clone();
    let run = task(handle.stop.clone(), tx);
    let finished = handle.finished.clone().drop_guard();
    let termination = Arc::clone(&handle.termination);

    tokio::spawn(
        async move {
            let _finished = finished;
            let _queue = queue;
            tracing::debug!(capacity, "Stream task started");

            let worker = tokio::spawn(run.in_current_span());
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Termination::Failed(StreamError::Panicked {
                    message: panic_message(e.into_panic()),
                }),
                Err(_cancelled) => Termination::Stopped,
            };
            match &outcome {
                Termination::Stopped => tracing::info!("Stream stopped"),
                Termination::Failed(error) => tracing::error!(error = %error, "Stream failed"),
                Termination::ReceiverDropped => tracing::info!("Receiver dropped, stream ended"),
                Termination::Closed => tracing::debug!("Source closed, stream ended"),
            }
            let _ = termination.set(outcome);
        }
        .instrument(span),
    );

    Stream {
        messages: rx,
        handle,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "non-string panic payload".to_string(), |m| (*m).to_string()),
    }
}
