//! Domain Layer - Core message types.
//!
//! This layer contains the decoded message model with no transport
//! dependencies. All types here are pure Rust with serialization support.

/// Decoded stream messages and their classification.
pub mod message;
