//! Tweet Stream Binary
//!
//! Connects to a streaming endpoint and writes every decoded message to
//! stdout as one JSON object per line. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! TWEET_STREAM_URL=https://stream.twitter.com/1.1/statuses/sample.json \
//! TWEET_STREAM_BEARER_TOKEN=... \
//! cargo run --bin tweet-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TWEET_STREAM_URL`: streaming endpoint
//!
//! ## Optional
//! - `TWEET_STREAM_METHOD`: GET | POST (default: GET)
//! - `TWEET_STREAM_PARAMS`: request parameters as `k=v&k=v`
//! - `TWEET_STREAM_BEARER_TOKEN`: sent as `Authorization: Bearer`
//! - `TWEET_STREAM_METRICS_PORT`: Prometheus port (default: 0, disabled)
//! - `TWEET_STREAM_QUEUE_CAPACITY`, `TWEET_STREAM_STALL_TIMEOUT_SECS`, ...:
//!   session tuning, see `StreamConfig`
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: `tweet_stream=info`)

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tweet_stream::infrastructure::{metrics, telemetry};
use tweet_stream::{AppConfig, ReqwestTransport, StopHandle, Termination, open_stream};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting tweet stream");

    let config = AppConfig::from_env()?;
    log_config(&config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        metrics::install_exporter(addr).context("failed to start metrics exporter")?;
        tracing::info!(%addr, "Metrics exporter listening");
    }

    let transport = Arc::new(ReqwestTransport::new(&config.stream)?);
    let mut stream = open_stream(transport, config.endpoint.to_request(), config.stream);

    tokio::spawn(stop_on_signal(stream.stop_handle()));

    let stdout = std::io::stdout();
    while let Some(message) = stream.recv().await {
        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, &message)?;
        writeln!(out)?;
        out.flush()?;
    }

    match stream.termination() {
        Some(Termination::Failed(error)) => {
            tracing::error!(error = %error, "Stream terminated");
            Err(error.into())
        }
        outcome => {
            tracing::info!(?outcome, "Tweet stream stopped");
            Ok(())
        }
    }
}

/// Stop the stream on SIGINT or SIGTERM.
async fn stop_on_signal(handle: StopHandle) {
    await_shutdown().await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.stop()).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Stream did not stop in time"
        );
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        url = %config.endpoint.url,
        method = %config.endpoint.method,
        params = config.endpoint.params.len(),
        authenticated = config.endpoint.bearer_token.is_some(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(stream = ?config.stream, "Stream settings");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, stopping stream"),
        () = terminate => tracing::info!("Received SIGTERM, stopping stream"),
    }
}
