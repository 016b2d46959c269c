//! Stream Codec Module
//!
//! Turns the raw response body into decoded frames.
//!
//! - **`LineFramer`**: splits bytes on `\n`, stripping a trailing `\r`
//! - **`JsonCodec`**: decodes one line into a classified [`Message`]
//! - **`Decoder`**: drives both over a [`ResponseBody`], one per connection
//!
//! # Wire Format
//!
//! ```text
//! {"id":1,"text":"..."}\r\n
//! \r\n                       <- keep-alive
//! {"delete":{...}}\r\n
//! ```

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::application::ports::{ResponseBody, TransportError};
use crate::domain::message::{MalformedLine, Message};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Line Framing
// =============================================================================

/// Accumulates chunks and yields complete lines.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Bytes of `buffer` already known to contain no newline.
    scanned: usize,
    max_line_bytes: usize,
}

impl LineFramer {
    /// Create a framer that reports overflow past `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line_bytes,
        }
    }

    /// Append a received chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete line without its terminator.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let offset = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == b'\n');

        let Some(offset) = offset else {
            self.scanned = self.buffer.len();
            return None;
        };

        let mut line = self.buffer.split_to(self.scanned + offset + 1);
        self.scanned = 0;
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line.freeze())
    }

    /// Take whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let mut rest = self.buffer.split();
        if rest.last() == Some(&b'\r') {
            rest.truncate(rest.len() - 1);
        }
        Some(rest.freeze())
    }

    /// Drop any partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Whether the unterminated tail grew past the line limit.
    #[must_use]
    pub fn is_overflowing(&self) -> bool {
        self.scanned > self.max_line_bytes
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

// =============================================================================
// JSON Codec
// =============================================================================

/// JSON codec for stream lines.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one line. Blank lines are keep-alives and yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not valid JSON.
    pub fn decode_line(&self, line: &[u8]) -> Result<Option<Message>, CodecError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let value: serde_json::Value = serde_json::from_slice(line)?;
        Ok(Some(Message::classify(value)))
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// One decoded unit of the body.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A decoded message.
    Message(Message),
    /// A blank keep-alive line.
    KeepAlive,
    /// A line that failed to decode.
    Malformed(MalformedLine),
}

/// Why the body stopped producing frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closed the body cleanly.
    Eof,
    /// Reading failed.
    Io(TransportError),
}

/// Lazily decodes one connection's body into frames.
///
/// Not restartable: once it reports [`StreamEnd`], later calls report
/// [`StreamEnd::Eof`]. A new decoder is created for every connection.
#[derive(Debug)]
pub struct Decoder {
    body: Option<ResponseBody>,
    framer: LineFramer,
    codec: JsonCodec,
    last_activity: Instant,
}

impl Decoder {
    /// Create a decoder over `body`.
    #[must_use]
    pub fn new(body: ResponseBody, max_line_bytes: usize) -> Self {
        Self {
            body: Some(body),
            framer: LineFramer::new(max_line_bytes),
            codec: JsonCodec::new(),
            last_activity: Instant::now(),
        }
    }

    /// When bytes were last received, keep-alives included.
    #[must_use]
    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Decode the next frame.
    ///
    /// Cancel safe: received bytes are buffered before the next await, so a
    /// dropped call loses nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StreamEnd`] when the body is exhausted or failed.
    pub async fn next_frame(&mut self) -> Result<Frame, StreamEnd> {
        loop {
            if let Some(line) = self.framer.next_line() {
                return Ok(self.decode(&line));
            }

            if self.framer.is_overflowing() {
                let limit = self.framer.max_line_bytes;
                self.abort();
                return Err(StreamEnd::Io(TransportError::LineTooLong { limit }));
            }

            let Some(body) = self.body.as_mut() else {
                return Err(StreamEnd::Eof);
            };

            match body.next_chunk().await {
                Some(Ok(chunk)) => {
                    self.last_activity = Instant::now();
                    self.framer.push(&chunk);
                }
                Some(Err(e)) => {
                    self.abort();
                    return Err(StreamEnd::Io(e));
                }
                None => {
                    self.body = None;
                    if let Some(tail) = self.framer.finish() {
                        return Ok(self.decode(&tail));
                    }
                    return Err(StreamEnd::Eof);
                }
            }
        }
    }

    /// Abort the body and drop any partial line.
    pub fn abort(&mut self) {
        if let Some(body) = self.body.take() {
            body.abort();
        }
        self.framer.clear();
    }

    fn decode(&self, line: &[u8]) -> Frame {
        match self.codec.decode_line(line) {
            Ok(Some(message)) => Frame::Message(message),
            Ok(None) => Frame::KeepAlive,
            Err(e) => Frame::Malformed(MalformedLine {
                line: String::from_utf8_lossy(line).into_owned(),
                error: e.to_string(),
            }),
        }
    }
}
