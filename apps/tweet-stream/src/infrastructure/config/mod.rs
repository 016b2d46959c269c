//! Configuration Module
//!
//! Configuration loading for the streaming client and binary.

mod settings;

pub use settings::{
    AppConfig, BackoffSettings, BearerToken, ConfigError, EndpointSettings, StreamConfig,
};
