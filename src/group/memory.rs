//! In-process consumer group.
//!
//! [`MemoryGroup`] follows the same generation lifecycle as the Kafka group
//! without a broker. Tests script it through a [`MemoryGroupHandle`]:
//! assign partitions, deliver messages, revoke, inject fatal errors, and
//! observe commits in the order they were marked.
//!
//! # Example
//!
//! ```rust
//! use cdcwatch::group::MemoryGroup;
//!
//! let (group, handle) = MemoryGroup::new("cdcwatch-consumer-group");
//! handle.assign("users", &[0, 1]);
//! assert!(handle.commits().is_empty());
//! # drop(group);
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::generation::{Delivery, Generation};
use super::{assignment_of, AssignedPartition, Assignment, ConsumerGroup, GroupHandler, GroupSession};
use crate::cdc::message::RawMessage;
use crate::error::CdcError;

const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// An offset recorded by [`GroupSession::mark_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOffset {
    /// Topic name.
    pub topic: String,
    /// Partition id.
    pub partition: i32,
    /// Offset of the marked message.
    pub offset: i64,
    /// Generation the message was marked in.
    pub generation: u64,
}

#[derive(Debug)]
enum Command {
    Assign(Vec<AssignedPartition>),
    Deliver(RawMessage),
    Revoke,
    Fail(String),
}

#[derive(Debug, Default)]
struct Shared {
    commits: Mutex<Vec<CommittedOffset>>,
    commit_error: Mutex<Option<String>>,
    close_error: Mutex<Option<String>>,
    closed: AtomicBool,
    generations: AtomicU64,
    changed: Notify,
}

impl Shared {
    fn commits(&self) -> std::sync::MutexGuard<'_, Vec<CommittedOffset>> {
        self.commits.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct PumpState {
    commands: mpsc::UnboundedReceiver<Command>,
    carried: Option<Vec<AssignedPartition>>,
    pending: Vec<RawMessage>,
}

/// Consumer group backed by in-process channels.
pub struct MemoryGroup {
    group_id: String,
    state: tokio::sync::Mutex<PumpState>,
    shared: Arc<Shared>,
}

/// Test-side controller for a [`MemoryGroup`].
#[derive(Clone)]
pub struct MemoryGroupHandle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl MemoryGroup {
    /// Creates a group and its controlling handle.
    pub fn new(group_id: impl Into<String>) -> (Self, MemoryGroupHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let group = Self {
            group_id: group_id.into(),
            state: tokio::sync::Mutex::new(PumpState {
                commands: rx,
                carried: None,
                pending: Vec::new(),
            }),
            shared: Arc::clone(&shared),
        };
        (
            group,
            MemoryGroupHandle {
                commands: tx,
                shared,
            },
        )
    }
}

#[async_trait]
impl ConsumerGroup for MemoryGroup {
    async fn consume(
        &self,
        cancel: &CancellationToken,
        handler: Arc<dyn GroupHandler>,
    ) -> Result<(), CdcError> {
        let mut state = self.state.lock().await;

        let partitions = match state.carried.take() {
            Some(partitions) => partitions,
            None => loop {
                let command = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    command = state.commands.recv() => command,
                };
                match command {
                    Some(Command::Assign(partitions)) => break partitions,
                    Some(Command::Deliver(message)) => state.pending.push(message),
                    Some(Command::Revoke) => debug!("Revocation without assignment ignored"),
                    Some(Command::Fail(e)) => return Err(CdcError::Group(e)),
                    None => {
                        cancel.cancelled().await;
                        return Ok(());
                    }
                }
            },
        };

        let generation = self.shared.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(MemorySession {
            group_id: self.group_id.clone(),
            member_id: format!("{}-member", self.group_id),
            generation,
            assignment: assignment_of(&partitions),
            token: cancel.child_token(),
            shared: Arc::clone(&self.shared),
        });
        info!(
            group_id = %self.group_id,
            generation,
            assignment = ?session.assignment,
            "Partitions assigned"
        );

        let mut generation_run =
            Generation::start(session, handler, partitions, DEFAULT_CHANNEL_CAPACITY).await?;

        for message in std::mem::take(&mut state.pending) {
            if generation_run.deliver(message).await == Delivery::Unassigned {
                warn!("Dropping buffered message for unassigned partition");
            }
        }

        let token = generation_run.session().cancellation().clone();
        let outcome = loop {
            let command = tokio::select! {
                biased;
                _ = token.cancelled() => break Ok(()),
                failure = generation_run.claim_failure() => break Err(failure),
                command = state.commands.recv() => command,
            };
            match command {
                Some(Command::Deliver(message)) => {
                    let (topic, partition, offset) =
                        (message.topic.clone(), message.partition, message.offset);
                    match generation_run.deliver(message).await {
                        Delivery::Queued | Delivery::Cancelled => {}
                        Delivery::Unassigned => {
                            warn!(%topic, partition, offset, "Message for unassigned partition dropped")
                        }
                        Delivery::ClaimClosed => {
                            warn!(%topic, partition, offset, "Claim closed; message dropped")
                        }
                    }
                }
                Some(Command::Revoke) => {
                    info!(generation, "Partitions revoked");
                    break Ok(());
                }
                Some(Command::Assign(partitions)) => {
                    info!(generation, "Reassignment requested; ending generation");
                    state.carried = Some(partitions);
                    break Ok(());
                }
                Some(Command::Fail(e)) => break Err(CdcError::Group(e)),
                None => {
                    token.cancelled().await;
                    break Ok(());
                }
            }
        };

        generation_run.finish(outcome).await
    }

    async fn close(&self) -> Result<(), CdcError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.changed.notify_waiters();
        let error = self
            .shared
            .close_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match error {
            Some(e) => Err(CdcError::Close(e)),
            None => Ok(()),
        }
    }
}

struct MemorySession {
    group_id: String,
    member_id: String,
    generation: u64,
    assignment: Assignment,
    token: CancellationToken,
    shared: Arc<Shared>,
}

impl GroupSession for MemorySession {
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
        let injected = self
            .shared
            .commit_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(e) = injected {
            return Err(CdcError::Commit(e));
        }

        self.shared.commits().push(CommittedOffset {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            generation: self.generation,
        });
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

impl MemoryGroupHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Memory group dropped; command ignored");
        }
    }

    /// Grants `partitions` of `topic`, starting a generation.
    pub fn assign(&self, topic: &str, partitions: &[i32]) {
        self.send(Command::Assign(
            partitions
                .iter()
                .map(|p| AssignedPartition::new(topic, *p))
                .collect(),
        ));
    }

    /// Delivers a message to its partition.
    pub fn deliver(&self, message: RawMessage) {
        self.send(Command::Deliver(message));
    }

    /// Revokes the current assignment, ending the generation.
    pub fn revoke(&self) {
        self.send(Command::Revoke);
    }

    /// Makes the running (or next) `consume` call fail.
    pub fn fail(&self, error: impl Into<String>) {
        self.send(Command::Fail(error.into()));
    }

    /// Makes every subsequent `mark_message` fail.
    pub fn fail_commits(&self, error: impl Into<String>) {
        *self
            .shared
            .commit_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(error.into());
    }

    /// Makes `close` fail.
    pub fn fail_close(&self, error: impl Into<String>) {
        *self
            .shared
            .close_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(error.into());
    }

    /// Offsets marked so far, in marking order.
    pub fn commits(&self) -> Vec<CommittedOffset> {
        self.shared.commits().clone()
    }

    /// Number of generations started so far.
    pub fn generations(&self) -> u64 {
        self.shared.generations.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` offsets are marked.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_commits(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |shared| shared.commits().len() >= count)
            .await
    }

    /// Waits until at least `count` generations have started.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_generations(&self, count: u64, timeout: Duration) -> bool {
        self.wait_until(timeout, |shared| {
            shared.generations.load(Ordering::SeqCst) >= count
        })
        .await
    }

    async fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn(&Shared) -> bool,
    {
        let wait = async {
            loop {
                let changed = self.shared.changed.notified();
                if condition(&self.shared) {
                    return;
                }
                // generations are counted without a notification
                let _ = tokio::time::timeout(Duration::from_millis(10), changed).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
