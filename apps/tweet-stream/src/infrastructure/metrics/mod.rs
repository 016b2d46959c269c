//! Prometheus Metrics Module
//!
//! Application metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: Counts of decoded messages by kind, and decode failures
//! - **Connections**: Connected gauge, reconnects by reason, fatal rejections
//!
//! Recording is a no-op until a recorder is installed, so the library can
//! be embedded without pulling in the exporter.

use std::net::SocketAddr;
use std::sync::Once;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::message::MessageKind;

static DESCRIBE: Once = Once::new();

/// Install the Prometheus exporter, serving `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "tweet_stream_messages_received_total",
            "Total messages decoded from the stream"
        );
        describe_counter!(
            "tweet_stream_decode_errors_total",
            "Total lines that failed to decode"
        );
        describe_counter!(
            "tweet_stream_reconnects_total",
            "Total reconnection attempts by reason"
        );
        describe_counter!(
            "tweet_stream_fatal_errors_total",
            "Total streams terminated by a non-retryable response"
        );
        describe_gauge!(
            "tweet_stream_connected",
            "Whether the stream currently holds an open connection"
        );
    });
}

/// Record a message decoded from the stream.
pub fn record_message_received(kind: MessageKind) {
    counter!(
        "tweet_stream_messages_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a line that failed to decode.
pub fn record_decode_error() {
    counter!("tweet_stream_decode_errors_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(reason: &'static str) {
    counter!(
        "tweet_stream_reconnects_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a non-retryable rejection.
pub fn record_fatal_error(status: u16) {
    counter!(
        "tweet_stream_fatal_errors_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Update the connected gauge.
pub fn set_connected(connected: bool) {
    gauge!("tweet_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_into_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_message_received(MessageKind::Tweet);
            record_message_received(MessageKind::Tweet);
            record_decode_error();
            record_reconnect("stalled");
            record_fatal_error(401);
            set_connected(true);
        });

        let rendered = handle.render();
        assert!(rendered.contains("tweet_stream_messages_received_total{kind=\"tweet\"} 2"));
        assert!(rendered.contains("tweet_stream_decode_errors_total 1"));
        assert!(rendered.contains("tweet_stream_reconnects_total{reason=\"stalled\"} 1"));
        assert!(rendered.contains("tweet_stream_fatal_errors_total{status=\"401\"} 1"));
        assert!(rendered.contains("tweet_stream_connected 1"));
    }
}
