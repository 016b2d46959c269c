//! Application Layer - Port definitions.
//!
//! This layer defines the contracts the streaming core depends on, so that
//! concrete adapters (or test doubles) can be substituted freely.

/// Port interfaces for external systems (HTTP transport).
pub mod ports;
