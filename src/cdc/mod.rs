//! Change-data-capture message handling
//!
//! Decoding, classification and dispatch of change events read from the
//! subscribed topic.

pub mod classifier;
pub mod dispatcher;
pub mod message;

pub use classifier::{classify, Classified, Fallback, TombstoneKind, Unparsable};
pub use dispatcher::{surfaced_images, ImageField, LoggingDispatcher, MessageHandler};
pub use message::{ChangeEnvelope, Operation, RawMessage, SourceMetadata};
