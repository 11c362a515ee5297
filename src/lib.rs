//! cdcwatch - change-data-capture event consumer library
//!
//! This library provides the pieces of a Kafka CDC consumer: a startup
//! connectivity probe, consumer group membership with per-partition claims,
//! classification and dispatch of change envelopes, and the lifecycle
//! controller that ties them together.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `probe`: Bounded-retry broker connectivity check
//! - `group`: Consumer group traits, generation runner, readiness latch, and
//!   an in-process group
//! - `kafka`: `rdkafka`-backed consumer group and client configuration
//! - `cdc`: Message model, classifier, and dispatcher
//! - `watcher`: Claim loop, lifecycle controller, and logging setup
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use cdcwatch::{Config, Watcher};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/cdcwatch.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     Watcher::new(config).run().await?;
//!     Ok(())
//! }
//! ```

pub mod cdc;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod group;
pub mod kafka;
pub mod metrics;
pub mod probe;
pub mod watcher;

// Re-export commonly used types
pub use cdc::{classify, Classified, MessageHandler, RawMessage};
pub use config::Config;
pub use error::{CdcError, Result};
pub use group::{ConsumerGroup, GroupHandler, GroupSession, MemoryGroup};
pub use watcher::Watcher;

#[cfg(test)]
pub mod test_utils;
