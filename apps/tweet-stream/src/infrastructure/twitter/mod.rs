//! Streaming Client
//!
//! Consumes a long-lived chunked HTTP response of newline-delimited JSON.
//!
//! # Components
//!
//! - [`codec`]: line framing and JSON decoding per connection
//! - [`connection`]: connect, classify, decode, reconnect
//! - [`reconnect`]: transient and rate-limit backoff schedules
//! - [`stall`]: keep-alive based liveness
//! - [`stop`]: one-shot stop signal
//! - [`stream`]: background task and delivery queue
//!
//! # Reconnection Policy
//!
//! | Failure                         | Schedule                        |
//! |---------------------------------|---------------------------------|
//! | network, 5xx, stall, EOF        | 250ms doubling to 16s, jittered |
//! | HTTP 420 / 429                  | 60s doubling to 16min           |
//! | other 1xx/3xx/4xx               | none, stream fails              |

pub mod codec;
pub mod connection;
pub mod reconnect;
pub mod stall;
pub mod stop;
pub mod stream;

pub use codec::{CodecError, Decoder, Frame, JsonCodec, LineFramer, StreamEnd};
pub use connection::{ConnectionManager, Disconnect, StatusClass, classify_status};
pub use reconnect::{Backoff, ReconnectSchedule, Schedule};
pub use stall::StallDetector;
pub use stop::StopSignal;
pub use stream::{StopHandle, Stream, StreamError, Termination, open_stream};
