//! Kafka-backed consumer group.
//!
//! Wraps an `rdkafka` [`StreamConsumer`] subscribed to one topic. Rebalance
//! callbacks are forwarded from the client context over a channel; a single
//! pump task reads both the rebalance events and the message stream and
//! feeds per-partition claims through a [`Generation`].
//!
//! Offsets are stored explicitly when a message is marked and flushed by the
//! client's auto-commit timer. With auto-commit enabled the client also
//! commits the stored offsets of revoked partitions while it unassigns them,
//! so the rebalance callbacks only forward events. Closing the group commits
//! synchronously before unsubscribing.

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::KafkaClientConfig;
use crate::cdc::message::RawMessage;
use crate::error::CdcError;
use crate::group::generation::{Delivery, Generation};
use crate::group::{
    assignment_of, AssignedPartition, Assignment, ConsumerGroup, GroupHandler, GroupSession,
};
use crate::metrics;

/// Rebalance notification forwarded from the client context.
#[derive(Debug)]
enum RebalanceEvent {
    Assigned(Vec<AssignedPartition>),
    Revoked(Vec<AssignedPartition>),
    Failed(String),
}

/// Client context forwarding rebalance callbacks to the pump.
pub struct SessionContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
}

impl SessionContext {
    fn forward(&self, event: RebalanceEvent) {
        if self.events.send(event).is_err() {
            debug!("Rebalance event dropped; group is shutting down");
        }
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<AssignedPartition> {
    tpl.elements()
        .iter()
        .map(|elem| AssignedPartition {
            topic: elem.topic().to_string(),
            partition: elem.partition(),
            initial_offset: match elem.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            },
        })
        .collect()
}

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                metrics::record_rebalance("revoke");
                self.forward(RebalanceEvent::Revoked(partitions_of(tpl)));
            }
            Rebalance::Error(e) => {
                metrics::record_rebalance("error");
                self.forward(RebalanceEvent::Failed(e.to_string()));
            }
            Rebalance::Assign(_) => {}
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Assign(tpl) = rebalance {
            metrics::record_rebalance("assign");
            self.forward(RebalanceEvent::Assigned(partitions_of(tpl)));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "Offsets committed"),
            Err(e) if is_no_offset(&e) => {}
            Err(e) => warn!(error = %e, "Offset commit failed"),
        }
    }
}

fn is_no_offset(error: &KafkaError) -> bool {
    error.rdkafka_error_code() == Some(RDKafkaErrorCode::NoOffset)
}

type GroupConsumer = StreamConsumer<SessionContext>;

/// Synchronously commits every stored offset. Nothing stored is success.
fn commit_stored(consumer: &GroupConsumer) -> Result<(), CdcError> {
    match consumer.commit_consumer_state(CommitMode::Sync) {
        Ok(()) => Ok(()),
        Err(e) if is_no_offset(&e) => Ok(()),
        Err(e) => Err(CdcError::Commit(e.to_string())),
    }
}

/// What the pump observed on one turn.
enum Next {
    Stop,
    Rebalance(Option<RebalanceEvent>),
    Message(RawMessage),
    Transient(KafkaError),
    Fatal(KafkaError),
}

impl Next {
    fn from_poll(result: KafkaResult<BorrowedMessage<'_>>) -> Self {
        match result {
            Ok(message) => Next::Message(raw_message(&message)),
            Err(e @ KafkaError::MessageConsumption(_)) | Err(e @ KafkaError::PartitionEOF(_)) => {
                Next::Transient(e)
            }
            Err(e) => Next::Fatal(e),
        }
    }
}

fn raw_message(message: &BorrowedMessage<'_>) -> RawMessage {
    RawMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

struct PumpState {
    events: mpsc::UnboundedReceiver<RebalanceEvent>,
    carried: Option<Vec<AssignedPartition>>,
    pending: Vec<RawMessage>,
}

/// Consumer group membership on a Kafka cluster.
pub struct KafkaGroup {
    consumer: Arc<GroupConsumer>,
    group_id: String,
    member_id: String,
    topic: String,
    channel_capacity: usize,
    generations: AtomicU64,
    state: tokio::sync::Mutex<PumpState>,
}

impl KafkaGroup {
    /// Creates the group client and subscribes to the configured topic.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Group` if the client cannot be created or the
    /// subscription is rejected. Not retried.
    pub fn join(config: &KafkaClientConfig) -> Result<Self, CdcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let properties = config.group_properties();
        let member_id = properties
            .iter()
            .find(|(key, _)| key == "client.id")
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| config.group_id.clone());

        let consumer: GroupConsumer = KafkaClientConfig::client_config(&properties)
            .create_with_context(SessionContext { events: tx })
            .map_err(|e| CdcError::Group(format!("failed to create consumer group client: {}", e)))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| CdcError::Group(format!("failed to subscribe to {}: {}", config.topic, e)))?;

        info!(
            brokers = %config.bootstrap_servers(),
            topic = %config.topic,
            group_id = %config.group_id,
            security_protocol = %config.security_protocol.as_str(),
            "Joined consumer group"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            group_id: config.group_id.clone(),
            member_id,
            topic: config.topic.clone(),
            channel_capacity: config.channel_capacity,
            generations: AtomicU64::new(0),
            state: tokio::sync::Mutex::new(PumpState {
                events: rx,
                carried: None,
                pending: Vec::new(),
            }),
        })
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl ConsumerGroup for KafkaGroup {
    async fn consume(
        &self,
        cancel: &CancellationToken,
        handler: Arc<dyn GroupHandler>,
    ) -> Result<(), CdcError> {
        let mut state = self.state.lock().await;

        let partitions = match state.carried.take() {
            Some(partitions) => partitions,
            None => loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Next::Stop,
                    event = state.events.recv() => Next::Rebalance(event),
                    result = self.consumer.recv() => Next::from_poll(result),
                };
                match next {
                    Next::Stop => return Ok(()),
                    Next::Rebalance(Some(RebalanceEvent::Assigned(partitions))) => break partitions,
                    Next::Rebalance(Some(RebalanceEvent::Revoked(_))) => continue,
                    Next::Rebalance(Some(RebalanceEvent::Failed(e))) => {
                        return Err(CdcError::Group(format!("rebalance failed: {}", e)))
                    }
                    Next::Rebalance(None) => {
                        return Err(CdcError::Group("rebalance channel closed".to_string()))
                    }
                    Next::Message(message) => state.pending.push(message),
                    Next::Transient(e) => warn!(error = %e, "Transient consumer error"),
                    Next::Fatal(e) => return Err(CdcError::Group(e.to_string())),
                }
            },
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(KafkaSession {
            consumer: Arc::clone(&self.consumer),
            group_id: self.group_id.clone(),
            member_id: self.member_id.clone(),
            generation,
            assignment: assignment_of(&partitions),
            token: cancel.child_token(),
        });
        info!(
            group_id = %self.group_id,
            generation,
            assignment = ?session.assignment,
            "Partitions assigned"
        );

        let mut generation_run =
            Generation::start(session, handler, partitions, self.channel_capacity).await?;

        for message in std::mem::take(&mut state.pending) {
            if generation_run.deliver(message).await == Delivery::Unassigned {
                warn!("Dropping early message for unassigned partition");
            }
        }

        let token = generation_run.session().cancellation().clone();
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => Next::Stop,
                failure = generation_run.claim_failure() => break Err(failure),
                event = state.events.recv() => Next::Rebalance(event),
                result = self.consumer.recv() => Next::from_poll(result),
            };

            match next {
                Next::Stop => break Ok(()),
                Next::Message(message) => {
                    let (partition, offset) = (message.partition, message.offset);
                    match generation_run.deliver(message).await {
                        Delivery::Queued | Delivery::Cancelled => {}
                        Delivery::Unassigned => {
                            warn!(partition, offset, "Message for unassigned partition dropped")
                        }
                        Delivery::ClaimClosed => {
                            warn!(partition, offset, "Claim closed; message will be redelivered")
                        }
                    }
                }
                Next::Rebalance(Some(RebalanceEvent::Revoked(partitions))) => {
                    info!(generation, revoked = partitions.len(), "Partitions revoked");
                    break Ok(());
                }
                Next::Rebalance(Some(RebalanceEvent::Assigned(partitions))) => {
                    info!(generation, "Assignment changed; ending generation");
                    state.carried = Some(partitions);
                    break Ok(());
                }
                Next::Rebalance(Some(RebalanceEvent::Failed(e))) => {
                    break Err(CdcError::Group(format!("rebalance failed: {}", e)))
                }
                Next::Rebalance(None) => {
                    break Err(CdcError::Group("rebalance channel closed".to_string()))
                }
                Next::Transient(e) => warn!(error = %e, "Transient consumer error"),
                Next::Fatal(e) => {
                    error!(error = %e, "Consumer error");
                    break Err(CdcError::Group(e.to_string()));
                }
            }
        };

        generation_run.finish(outcome).await
    }

    async fn close(&self) -> Result<(), CdcError> {
        let consumer = Arc::clone(&self.consumer);
        let group_id = self.group_id.clone();

        tokio::task::spawn_blocking(move || {
            let committed = commit_stored(&consumer);
            consumer.unsubscribe();
            info!(group_id = %group_id, "Consumer group closed");
            committed
        })
        .await
        .map_err(|e| CdcError::Close(e.to_string()))?
    }
}

struct KafkaSession {
    consumer: Arc<GroupConsumer>,
    group_id: String,
    member_id: String,
    generation: u64,
    assignment: Assignment,
    token: CancellationToken,
}

impl GroupSession for KafkaSession {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    fn mark_message(&self, message: &RawMessage) -> Result<(), CdcError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| CdcError::Commit(e.to_string()))?;

        match self.consumer.store_offsets(&tpl) {
            Ok(()) => Ok(()),
            // partition already revoked; the next owner re-reads from the last commit
            Err(e) if e.rdkafka_error_code() == Some(RDKafkaErrorCode::State) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Offset not stored for revoked partition"
                );
                Ok(())
            }
            Err(e) => Err(CdcError::Commit(e.to_string())),
        }
    }
}
