//! Consumer group membership
//!
//! A [`ConsumerGroup`] drives one membership generation per call to
//! [`ConsumerGroup::consume`]: it waits for a partition assignment, opens a
//! [`GroupSession`], hands each assigned partition to the
//! [`GroupHandler`] as a [`PartitionClaim`], and ends the generation on
//! revocation, cancellation, or a fatal client error. Callers loop over
//! `consume` to follow rebalances.
//!
//! Two implementations exist: [`crate::kafka::KafkaGroup`] for a real
//! cluster and [`memory::MemoryGroup`], an in-process fake driven by a
//! [`memory::MemoryGroupHandle`].

pub mod generation;
pub mod memory;
pub mod readiness;

use async_trait::async_trait;
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::cdc::message::RawMessage;
use crate::error::CdcError;

pub use memory::{CommittedOffset, MemoryGroup, MemoryGroupHandle};
pub use readiness::{ReadyLatch, ReadySignal};

/// Partitions assigned to this member, by topic.
pub type Assignment = BTreeMap<String, Vec<i32>>;

/// A partition granted by the coordinator, before its stream is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedPartition {
    /// Topic name.
    pub topic: String,
    /// Partition id.
    pub partition: i32,
    /// Starting offset, when the client reports one.
    pub initial_offset: Option<i64>,
}

impl AssignedPartition {
    /// Creates an assigned partition without a known starting offset.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            initial_offset: None,
        }
    }
}

/// Groups a flat partition list by topic.
pub fn assignment_of(partitions: &[AssignedPartition]) -> Assignment {
    let mut assignment = Assignment::new();
    for p in partitions {
        assignment
            .entry(p.topic.clone())
            .or_default()
            .push(p.partition);
    }
    for list in assignment.values_mut() {
        list.sort_unstable();
    }
    assignment
}

/// Exclusive right, within this process, to read one partition.
///
/// The claim is a stream of messages in offset order that ends when the
/// partition is revoked or the generation closes.
#[derive(Debug)]
pub struct PartitionClaim {
    /// Topic name.
    pub topic: String,
    /// Partition id.
    pub partition: i32,
    /// Starting offset, when known.
    pub initial_offset: Option<i64>,
    messages: ReceiverStream<RawMessage>,
}

impl PartitionClaim {
    /// Wraps a message receiver as a claim.
    pub fn new(assigned: AssignedPartition, messages: mpsc::Receiver<RawMessage>) -> Self {
        Self {
            topic: assigned.topic,
            partition: assigned.partition,
            initial_offset: assigned.initial_offset,
            messages: ReceiverStream::new(messages),
        }
    }
}

impl Stream for PartitionClaim {
    type Item = RawMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.messages).poll_next(cx)
    }
}

/// One generation of group membership.
///
/// Shared read-only by every claim of the generation.
pub trait GroupSession: Send + Sync {
    /// Consumer group id.
    fn group_id(&self) -> &str;

    /// Identity of this member within the group.
    fn member_id(&self) -> &str;

    /// Generation counter, starting at 1 for the first assignment.
    fn generation(&self) -> u64;

    /// Partitions claimed in this generation.
    fn assignment(&self) -> &Assignment;

    /// Cancelled when the generation ends or the process shuts down.
    fn cancellation(&self) -> &CancellationToken;

    /// Marks `message` as handled so its offset is committed.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Commit` when the offset cannot be recorded.
    fn mark_message(&self, message: &RawMessage) -> Result<(), CdcError>;
}

/// Callbacks for one generation.
#[async_trait]
pub trait GroupHandler: Send + Sync {
    /// Called once the generation has its assignment, before any claim runs.
    async fn setup(&self, session: &dyn GroupSession) -> Result<(), CdcError>;

    /// Called after every claim of the generation has returned.
    async fn cleanup(&self, session: &dyn GroupSession) -> Result<(), CdcError>;

    /// Consumes one partition until its stream ends or the session is
    /// cancelled. Runs concurrently with the other claims.
    async fn consume_claim(
        &self,
        session: Arc<dyn GroupSession>,
        claim: PartitionClaim,
    ) -> Result<(), CdcError>;
}

/// Membership in a consumer group.
#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Runs exactly one generation.
    ///
    /// Returns `Ok(())` when the generation ends by revocation or because
    /// `cancel` fired, `Err` on a fatal client or handler error.
    async fn consume(
        &self,
        cancel: &CancellationToken,
        handler: Arc<dyn GroupHandler>,
    ) -> Result<(), CdcError>;

    /// Commits outstanding offsets and releases the client.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Commit` or `CdcError::Close` when release fails.
    async fn close(&self) -> Result<(), CdcError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_assignment_groups_and_sorts() {
        let assignment = assignment_of(&[
            AssignedPartition::new("users", 2),
            AssignedPartition::new("orders", 0),
            AssignedPartition::new("users", 0),
        ]);
        assert_eq!(assignment.get("users"), Some(&vec![0, 2]));
        assert_eq!(assignment.get("orders"), Some(&vec![0]));
    }

    #[tokio::test]
    async fn test_claim_streams_until_sender_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let mut claim = PartitionClaim::new(AssignedPartition::new("users", 1), rx);
        tx.send(RawMessage::new("users", 1, 10, b"a".to_vec()))
            .await
            .unwrap();
        tx.send(RawMessage::new("users", 1, 11, b"b".to_vec()))
            .await
            .unwrap();
        drop(tx);

        let offsets: Vec<i64> = (&mut claim).map(|m| m.offset).collect().await;
        assert_eq!(offsets, vec![10, 11]);
        assert!(claim.next().await.is_none());
    }
}
