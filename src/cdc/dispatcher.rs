//! Dispatch of classified messages.
//!
//! [`MessageHandler`] is the sink seam for decoded events. The default sink,
//! [`LoggingDispatcher`], reports every message as structured log lines and
//! never fails; other sinks may return errors, which the claim loop logs
//! without stopping.
//!
//! Which image fields an envelope surfaces depends on its operation, see
//! [`surfaced_images`].
//!
//! # Example
//!
//! ```rust
//! use cdcwatch::cdc::{Classified, MessageHandler, RawMessage};
//!
//! struct CountingHandler(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl MessageHandler for CountingHandler {
//!     async fn handle(
//!         &self,
//!         _message: &RawMessage,
//!         _classified: &Classified,
//!     ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         Ok(())
//!     }
//! }
//! ```

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use super::classifier::{Classified, TombstoneKind, Unparsable};
use super::message::{ChangeEnvelope, Operation, RawMessage};
use crate::metrics;

/// Sink for classified messages.
///
/// Called once per message, in partition order, before the message is
/// marked committed. Returning `Err` does not prevent the commit.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one classified message.
    async fn handle(
        &self,
        message: &RawMessage,
        classified: &Classified,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Image fields of a change envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageField {
    /// State before the change.
    Before,
    /// State after the change.
    After,
    /// Update description.
    Patch,
    /// Document filter.
    Filter,
}

impl ImageField {
    /// Field name as it appears in the envelope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Patch => "patch",
            Self::Filter => "filter",
        }
    }

    fn value<'a>(&self, envelope: &'a ChangeEnvelope) -> Option<&'a JsonValue> {
        match self {
            Self::Before => envelope.before.as_ref(),
            Self::After => envelope.after.as_ref(),
            Self::Patch => envelope.patch.as_ref(),
            Self::Filter => envelope.filter.as_ref(),
        }
    }
}

/// Image fields meaningful for an operation, in reporting order.
pub fn relevant_fields(op: &Operation) -> &'static [ImageField] {
    match op {
        Operation::Create | Operation::Read => &[ImageField::After],
        Operation::Update => &[
            ImageField::Before,
            ImageField::After,
            ImageField::Patch,
            ImageField::Filter,
        ],
        Operation::Delete => &[ImageField::Before, ImageField::Filter],
        Operation::Unknown(_) => &[],
    }
}

/// Image fields an envelope surfaces for its operation.
///
/// Creates, reads and deletes always report their relevant fields, with an
/// absent image shown as `null`. Updates skip absent fields, so an update
/// surfaces exactly the non-absent subset of before, after, patch and filter.
///
/// # Examples
///
/// ```
/// use cdcwatch::cdc::message::ChangeEnvelope;
/// use cdcwatch::cdc::dispatcher::{surfaced_images, ImageField};
///
/// let envelope = ChangeEnvelope::from_slice(br#"{"op":"u","after":{"a":1},"filter":{"_id":1}}"#).unwrap();
/// let fields: Vec<_> = surfaced_images(&envelope).into_iter().map(|(f, _)| f).collect();
/// assert_eq!(fields, vec![ImageField::After, ImageField::Filter]);
/// ```
pub fn surfaced_images(envelope: &ChangeEnvelope) -> Vec<(ImageField, &JsonValue)> {
    let skip_absent = matches!(envelope.op, Operation::Update);
    relevant_fields(&envelope.op)
        .iter()
        .filter_map(|field| match field.value(envelope) {
            Some(value) => Some((*field, value)),
            None if skip_absent => None,
            None => Some((*field, &NULL_IMAGE)),
        })
        .collect()
}

static NULL_IMAGE: JsonValue = JsonValue::Null;

/// Default sink: reports every message through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LoggingDispatcher;

impl LoggingDispatcher {
    /// Creates a new logging dispatcher.
    pub fn new() -> Self {
        Self
    }

    fn log_change(&self, message: &RawMessage, envelope: &ChangeEnvelope) {
        let timestamp = envelope
            .timestamp()
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();
        let database = envelope.source.db.as_deref().unwrap_or_default();
        let collection = envelope.source.collection_or_table().unwrap_or_default();

        metrics::record_operation(envelope.op.name());

        if let Operation::Unknown(code) = &envelope.op {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                op = %code,
                database,
                collection,
                timestamp = %timestamp,
                "Unknown operation"
            );
            return;
        }

        info!(
            operation = %envelope.op,
            database,
            collection,
            timestamp = %timestamp,
            "Change event"
        );

        for (field, value) in surfaced_images(envelope) {
            info!(
                operation = %envelope.op,
                field = field.as_str(),
                value = %value,
                "Change image"
            );
        }
    }

    fn log_tombstone(&self, message: &RawMessage, kind: TombstoneKind) {
        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            kind = kind.as_str(),
            "Tombstone received (delete completed)"
        );
    }

    fn log_unparsable(&self, message: &RawMessage, unparsable: &Unparsable) {
        warn!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            length = message.payload.len(),
            error = %unparsable.error,
            fallback = %unparsable.fallback,
            "Unparsable message"
        );
    }
}

#[async_trait::async_trait]
impl MessageHandler for LoggingDispatcher {
    async fn handle(
        &self,
        message: &RawMessage,
        classified: &Classified,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match classified {
            Classified::Change(envelope) => self.log_change(message, envelope),
            Classified::Tombstone(kind) => self.log_tombstone(message, *kind),
            Classified::Unparsable(unparsable) => self.log_unparsable(message, unparsable),
        }
        Ok(())
    }
}
