//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the streaming client built on the port interfaces
//! defined in the application layer, plus the concrete HTTP transports.

/// Streaming client: decoder, connection manager and stream orchestrator.
pub mod twitter;

/// HTTP transport adapters.
pub mod http;

/// Configuration from environment variables.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
