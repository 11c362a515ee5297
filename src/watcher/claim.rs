//! Partition claim loop
//!
//! [`ChangeConsumer`] is the [`GroupHandler`] used by the watcher. `setup`
//! fires the readiness latch; each claim is read in offset order, every
//! message is classified and dispatched, then marked committed. A message
//! is never marked before its dispatch step has returned, and a dispatch
//! failure or parse failure does not prevent the commit.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::cdc::{classify, MessageHandler, RawMessage};
use crate::error::CdcError;
use crate::group::{GroupHandler, GroupSession, PartitionClaim, ReadyLatch, ReadySignal};
use crate::message_fields;
use crate::metrics::{self, ClaimMetrics};

/// Group handler that classifies and dispatches every claimed message.
pub struct ChangeConsumer {
    dispatcher: Arc<dyn MessageHandler>,
    ready: ReadyLatch,
    include_payload: bool,
}

impl ChangeConsumer {
    /// Creates a consumer and the readiness signal for its first generation.
    pub fn new(dispatcher: Arc<dyn MessageHandler>, include_payload: bool) -> (Self, ReadySignal) {
        let (ready, signal) = ReadyLatch::new();
        (
            Self {
                dispatcher,
                ready,
                include_payload,
            },
            signal,
        )
    }

    /// Replaces the readiness latch for the next generation.
    pub fn rearm(&self) -> ReadySignal {
        self.ready.rearm()
    }

    async fn process(&self, message: &RawMessage) {
        let timestamp = message
            .timestamp_utc()
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();
        if self.include_payload {
            info!(
                timestamp = %timestamp,
                length = message.payload.len(),
                payload = %message.payload_lossy(),
                "Message claimed"
            );
        } else {
            info!(
                timestamp = %timestamp,
                length = message.payload.len(),
                "Message claimed"
            );
        }

        let classified = classify(&message.payload);
        metrics::record_message(classified.kind());

        if let Err(e) = self.dispatcher.handle(message, &classified).await {
            metrics::record_handler_error();
            warn!(kind = classified.kind(), error = %e, "Message handler failed");
        }
    }
}

#[async_trait]
impl GroupHandler for ChangeConsumer {
    async fn setup(&self, session: &dyn GroupSession) -> Result<(), CdcError> {
        info!(
            group_id = session.group_id(),
            member_id = session.member_id(),
            generation = session.generation(),
            assignment = ?session.assignment(),
            "Consumer group session started"
        );
        if self.ready.fire() {
            debug!(generation = session.generation(), "Readiness signalled");
        }
        Ok(())
    }

    async fn cleanup(&self, session: &dyn GroupSession) -> Result<(), CdcError> {
        info!(
            group_id = session.group_id(),
            generation = session.generation(),
            "Consumer group session ended"
        );
        Ok(())
    }

    async fn consume_claim(
        &self,
        session: Arc<dyn GroupSession>,
        mut claim: PartitionClaim,
    ) -> Result<(), CdcError> {
        let span = tracing::info_span!(
            "claim",
            topic = %claim.topic,
            partition = claim.partition,
            generation = session.generation()
        );

        async move {
            let claim_metrics = ClaimMetrics::new(&claim.topic, claim.partition);
            info!(initial_offset = ?claim.initial_offset, "Partition claim started");
            let cancelled = session.cancellation().clone();

            loop {
                let message = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => {
                        debug!("Partition claim cancelled");
                        break;
                    }
                    next = claim.next() => match next {
                        Some(message) => message,
                        None => {
                            info!("Partition claim ended");
                            break;
                        }
                    },
                };

                self.process(&message)
                    .instrument(message_fields!(message))
                    .await;
                session.mark_message(&message)?;
                claim_metrics.record_commit();
            }

            debug!(committed = claim_metrics.committed(), "Partition claim finished");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
