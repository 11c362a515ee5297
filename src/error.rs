//! Error types for cdcwatch
//!
//! This module defines the crate-level error type used throughout the
//! consumer, using `thiserror` for ergonomic error handling. Component
//! specific errors (such as [`crate::probe::ProbeError`]) convert into
//! [`CdcError`] at the boundaries where they become fatal.

use thiserror::Error;

use crate::probe::ProbeError;

/// Main error type for cdcwatch operations
///
/// Covers configuration loading, broker connectivity, consumer group
/// membership, offset commits, and handler failures.
#[derive(Error, Debug)]
pub enum CdcError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker connectivity check failed after all attempts
    #[error("Connectivity probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// Consumer group could not be created, joined, or driven
    #[error("Consumer group error: {0}")]
    Group(String),

    /// Offset commit failed
    #[error("Offset commit error: {0}")]
    Commit(String),

    /// Releasing the group client failed
    #[error("Close error: {0}")]
    Close(String),

    /// Group handler callback failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// The background consume loop stopped unexpectedly
    #[error("Consume loop terminated: {0}")]
    ConsumeLoop(String),
}

/// Result type alias for cdcwatch operations
///
/// Uses `anyhow::Error` so callers can attach context while the concrete
/// [`CdcError`] stays downcastable.
pub type Result<T> = anyhow::Result<T>;
