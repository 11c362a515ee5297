//! Generation runner shared by group implementations.
//!
//! Owns the per-partition channels and claim tasks of one generation. The
//! group implementation feeds messages through [`Generation::deliver`] from
//! a single pump, which keeps per-partition order, and ends the generation
//! with [`Generation::finish`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{AssignedPartition, GroupHandler, GroupSession, PartitionClaim};
use crate::cdc::message::RawMessage;
use crate::error::CdcError;

/// Outcome of handing one message to its partition claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the claim.
    Queued,
    /// The partition is not part of this generation.
    Unassigned,
    /// The claim has stopped reading.
    ClaimClosed,
    /// The session was cancelled while waiting for buffer space.
    Cancelled,
}

/// Claims and channels of one running generation.
pub struct Generation {
    session: Arc<dyn GroupSession>,
    handler: Arc<dyn GroupHandler>,
    senders: HashMap<(String, i32), mpsc::Sender<RawMessage>>,
    tasks: JoinSet<Result<(), CdcError>>,
}

impl Generation {
    /// Calls `handler.setup` and spawns one claim task per partition.
    ///
    /// # Errors
    ///
    /// Returns the setup error; no claim is started in that case.
    pub async fn start(
        session: Arc<dyn GroupSession>,
        handler: Arc<dyn GroupHandler>,
        partitions: Vec<AssignedPartition>,
        channel_capacity: usize,
    ) -> Result<Self, CdcError> {
        handler.setup(session.as_ref()).await?;

        let mut senders = HashMap::new();
        let mut tasks = JoinSet::new();
        for assigned in partitions {
            let (tx, rx) = mpsc::channel(channel_capacity.max(1));
            senders.insert((assigned.topic.clone(), assigned.partition), tx);

            let claim = PartitionClaim::new(assigned, rx);
            let session = Arc::clone(&session);
            let handler = Arc::clone(&handler);
            tasks.spawn(async move { handler.consume_claim(session, claim).await });
        }

        debug!(
            generation = session.generation(),
            claims = senders.len(),
            "Generation started"
        );

        Ok(Self {
            session,
            handler,
            senders,
            tasks,
        })
    }

    /// Session of this generation.
    pub fn session(&self) -> &Arc<dyn GroupSession> {
        &self.session
    }

    /// Queues `message` for its partition claim, waiting for buffer space.
    pub async fn deliver(&mut self, message: RawMessage) -> Delivery {
        let key = (message.topic.clone(), message.partition);
        let Some(tx) = self.senders.get(&key) else {
            return Delivery::Unassigned;
        };

        let token = self.session.cancellation().clone();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Delivery::Cancelled,
            sent = tx.send(message) => match sent {
                Ok(()) => Delivery::Queued,
                Err(_) => Delivery::ClaimClosed,
            },
        };

        if outcome == Delivery::ClaimClosed {
            self.senders.remove(&key);
        }
        outcome
    }

    /// Resolves with the error of the first claim that fails.
    ///
    /// Claims that return normally are reaped; if none fails this never
    /// resolves. Cancel safe.
    pub async fn claim_failure(&mut self) -> CdcError {
        loop {
            match self.tasks.join_next().await {
                Some(Ok(Ok(()))) => continue,
                Some(Ok(Err(e))) => return e,
                Some(Err(e)) => return CdcError::Handler(format!("claim task failed: {}", e)),
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Ends the generation.
    ///
    /// Cancels the session, closes every partition stream, waits for all
    /// claims, then calls `handler.cleanup`. The first error wins, in the
    /// order: `outcome`, claim errors, cleanup error.
    pub async fn finish(mut self, outcome: Result<(), CdcError>) -> Result<(), CdcError> {
        self.session.cancellation().cancel();
        self.senders.clear();

        let mut first_error = outcome.err();
        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(CdcError::Handler(format!("claim task failed: {}", e))),
            };
            if let Err(e) = result {
                warn!(error = %e, "Partition claim ended with error");
                first_error.get_or_insert(e);
            }
        }

        let cleanup = self.handler.cleanup(self.session.as_ref()).await;
        debug!(generation = self.session.generation(), "Generation finished");

        match (first_error, cleanup) {
            (Some(e), _) => Err(e),
            (None, result) => result,
        }
    }
}
