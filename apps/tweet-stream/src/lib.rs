#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Tweet Stream - Long-lived NDJSON Streaming Client
//!
//! Holds one chunked HTTP connection open against a streaming endpoint,
//! decodes newline-delimited JSON as it arrives and delivers each message
//! through a bounded queue. Transient failures reconnect with backoff; a
//! single `stop()` tears everything down without leaking the read loop.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: decoded message types
//!   - `message`: message classification by top-level key
//!
//! - **Application**: port definitions
//!   - `ports`: `Transport`, request and streaming response types
//!
//! - **Infrastructure**: adapters and the streaming client
//!   - `twitter`: decoder, connection manager, stream orchestrator
//!   - `http`: `reqwest` transport and scheme rewrite decorator
//!   - `config`: settings from environment variables
//!   - `metrics`, `telemetry`: observability
//!
//! - **Testing** (`testing` feature): local mock endpoint and assertions
//!
//! # Data Flow
//!
//! ```text
//! network bytes ──► Decoder ──► Message ──► delivery queue ──► application
//!                      ▲                          │
//!        ConnectionManager (reconnect)     closed once on exit
//!                      ▲
//!                 stop() signal
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Message types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Streaming client and adapters.
pub mod infrastructure;

/// Test support - Mock streaming endpoint and assertions.
#[cfg(feature = "testing")]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::message::{DisconnectNotice, MalformedLine, Message, MessageKind};

// Ports
pub use application::ports::{
    ResponseBody, StreamRequest, StreamResponse, Transport, TransportError,
};

// Streaming client
pub use infrastructure::twitter::{
    StopHandle, Stream, StreamError, Termination, open_stream,
};

// Transports
pub use infrastructure::http::{ReqwestTransport, RewriteTransport};

// Configuration
pub use infrastructure::config::{
    AppConfig, BackoffSettings, BearerToken, ConfigError, EndpointSettings, StreamConfig,
};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
