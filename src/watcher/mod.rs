//! Watcher service for consuming CDC events from Kafka
//!
//! # Modules
//!
//! - [`claim`]: Group handler that classifies, dispatches, and commits each
//!   claimed message
//! - [`logging`]: Structured logging configuration
//! - [`watcher`]: Lifecycle controller tying probe, group, and shutdown
//!   together

pub mod claim;
pub mod logging;
#[allow(clippy::module_inception)]
pub mod watcher;

pub use claim::ChangeConsumer;
pub use watcher::{shutdown_signal, supervise, Watcher};
