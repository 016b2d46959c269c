//! Stream Configuration Settings
//!
//! Configuration types for the streaming client, loaded from environment
//! variables. Defaults follow the published streaming guidance: network
//! errors back off from 250ms up to 16s, rate limiting starts at one minute
//! and doubles, and a connection silent for 90s is considered stalled.

use std::time::Duration;

use reqwest::{Method, Url};

use crate::application::ports::StreamRequest;

/// Environment variable prefix shared by every setting.
const ENV_PREFIX: &str = "TWEET_STREAM_";

/// Backoff schedule settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffSettings {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Growth factor applied after each retry.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl BackoffSettings {
    /// Schedule for network errors, server errors and stalls.
    #[must_use]
    pub const fn transient() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(16),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }

    /// Schedule for HTTP 420/429 responses.
    #[must_use]
    pub const fn rate_limit() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(16 * 60),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Clamp the float settings into a usable range.
    ///
    /// The multiplier must be finite and at least 1 so delays never shrink
    /// to zero. Jitter must be finite and within `[0, 1]`.
    #[must_use]
    pub fn normalized(self) -> Self {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let jitter_factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            multiplier,
            jitter_factor,
            ..self
        }
    }
}

/// Settings for one streaming session.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Capacity of the delivery queue.
    pub queue_capacity: usize,
    /// Timeout for receiving the response head.
    pub connect_timeout: Duration,
    /// Silence after which a connection is considered stalled.
    pub stall_timeout: Duration,
    /// Longest accepted line, in bytes.
    pub max_line_bytes: usize,
    /// Schedule for transient failures.
    pub backoff: BackoffSettings,
    /// Schedule for rate limiting.
    pub rate_limit: BackoffSettings,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            connect_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(90),
            max_line_bytes: 1024 * 1024,
            backoff: BackoffSettings::transient(),
            rate_limit: BackoffSettings::rate_limit(),
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader::new(lookup);
        let defaults = Self::default();
        let transient = BackoffSettings::transient();
        let rate_limit = BackoffSettings::rate_limit();
        let max_attempts = env.u32("MAX_RECONNECT_ATTEMPTS", transient.max_attempts);

        Self {
            queue_capacity: env.usize("QUEUE_CAPACITY", defaults.queue_capacity).max(1),
            connect_timeout: env.secs("CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            stall_timeout: env.secs("STALL_TIMEOUT_SECS", defaults.stall_timeout),
            max_line_bytes: env.usize("MAX_LINE_BYTES", defaults.max_line_bytes),
            backoff: BackoffSettings {
                initial_delay: env.millis("BACKOFF_INITIAL_MS", transient.initial_delay),
                max_delay: env.secs("BACKOFF_MAX_SECS", transient.max_delay),
                multiplier: env.f64("BACKOFF_MULTIPLIER", transient.multiplier),
                jitter_factor: env.f64("BACKOFF_JITTER", transient.jitter_factor),
                max_attempts,
            }
            .normalized(),
            rate_limit: BackoffSettings {
                initial_delay: env.secs("RATE_LIMIT_INITIAL_SECS", rate_limit.initial_delay),
                max_delay: env.secs("RATE_LIMIT_MAX_SECS", rate_limit.max_delay),
                max_attempts,
                ..rate_limit
            },
        }
    }
}

/// Streaming endpoint credentials.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// Get the token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

/// Endpoint settings used by the binary to build its request.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Streaming endpoint URL.
    pub url: Url,
    /// HTTP method.
    pub method: Method,
    /// Request parameters.
    pub params: Vec<(String, String)>,
    /// Optional bearer token.
    pub bearer_token: Option<BearerToken>,
}

impl EndpointSettings {
    /// Build the streaming request.
    #[must_use]
    pub fn to_request(&self) -> StreamRequest {
        let mut request = StreamRequest::new(self.method.clone(), self.url.clone());
        for (key, value) in &self.params {
            request = request.param(key.clone(), value.clone());
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose());
        }
        request
    }
}

/// Complete binary configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Endpoint settings.
    pub endpoint: EndpointSettings,
    /// Session settings.
    pub stream: StreamConfig,
    /// Prometheus exporter port (0 = disabled).
    pub metrics_port: u16,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader::new(&lookup);

        let raw_url = env
            .string("URL")
            .ok_or_else(|| ConfigError::MissingEnvVar(format!("{ENV_PREFIX}URL")))?;
        if raw_url.is_empty() {
            return Err(ConfigError::EmptyValue(format!("{ENV_PREFIX}URL")));
        }
        let url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}URL"),
            reason: e.to_string(),
        })?;

        let method = match env.string("METHOD") {
            Some(raw) => Method::from_bytes(raw.to_uppercase().as_bytes()).map_err(|e| {
                ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}METHOD"),
                    reason: e.to_string(),
                }
            })?,
            None => Method::GET,
        };

        let params = env
            .string("PARAMS")
            .map(|raw| parse_params(&url, &raw))
            .unwrap_or_default();

        let bearer_token = env
            .string("BEARER_TOKEN")
            .filter(|token| !token.is_empty())
            .map(BearerToken::new);

        Ok(Self {
            endpoint: EndpointSettings {
                url,
                method,
                params,
                bearer_token,
            },
            stream: StreamConfig::from_lookup(&lookup),
            metrics_port: env.u16("METRICS_PORT", 0),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
}

/// Decode `k=v&k=v` as a form-encoded query into ordered pairs.
///
/// Values are percent-decoded here and encoded again on the wire. Pairs
/// without `=` get an empty value.
fn parse_params(url: &Url, raw: &str) -> Vec<(String, String)> {
    let mut carrier = url.clone();
    carrier.set_query(Some(raw));
    carrier
        .query_pairs()
        .into_owned()
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Reads prefixed variables, falling back to defaults on absence or parse failure.
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    const fn new(lookup: F) -> Self {
        Self { lookup }
    }

    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.string(key).and_then(|v| v.trim().parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parse(key).unwrap_or(default)
    }

    fn u32(&self, key: &str, default: u32) -> u32 {
        self.parse(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parse(key).unwrap_or(default)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.parse::<f64>(key)
            .filter(|value| value.is_finite())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_millis)
    }
}
