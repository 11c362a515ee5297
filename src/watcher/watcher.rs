//! Lifecycle controller
//!
//! Runs the connectivity probe, joins the consumer group, drives the
//! background consume loop across rebalances, and shuts everything down on
//! a termination signal or a fatal error.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cdc::LoggingDispatcher;
use crate::config::Config;
use crate::error::CdcError;
use crate::group::{ConsumerGroup, GroupHandler, ReadySignal};
use crate::kafka::{KafkaClientConfig, KafkaGroup};
use crate::probe::{probe, KafkaConnector};
use crate::watcher::claim::ChangeConsumer;

/// Top-level CDC watcher service
///
/// # Example
///
/// ```rust,no_run
/// use cdcwatch::config::Config;
/// use cdcwatch::watcher::Watcher;
///
/// # async fn example() -> Result<(), cdcwatch::error::CdcError> {
/// let watcher = Watcher::new(Config::default());
/// watcher.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Watcher {
    config: Config,
}

impl Watcher {
    /// Create a watcher from validated configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the full lifecycle until a termination signal or a fatal error
    ///
    /// # Errors
    ///
    /// See [`Watcher::run_until`].
    pub async fn run(self) -> Result<(), CdcError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the full lifecycle until `shutdown` resolves or a fatal error
    ///
    /// The same `shutdown` future guards the connectivity probe and then the
    /// running group, so a signal is never missed between the two phases.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Probe` when the cluster never became reachable,
    /// `CdcError::Group` when the group cannot be joined or a generation
    /// fails, and `CdcError::Commit`/`CdcError::Close` when releasing the
    /// group fails.
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), CdcError>
    where
        S: Future<Output = &'static str> + Send,
    {
        let mut shutdown = Box::pin(shutdown);
        let kafka = &self.config.kafka;
        let client_config = KafkaClientConfig::from_settings(kafka)
            .map_err(|e| CdcError::Config(e.to_string()))?;

        info!(
            brokers = %client_config.bootstrap_servers(),
            topic = %client_config.topic,
            group_id = %client_config.group_id,
            "Starting CDC watcher"
        );

        let connector = KafkaConnector::new(client_config.clone(), self.config.probe.timeout());
        let endpoints = kafka.endpoints();
        let report = tokio::select! {
            report = probe(&connector, &endpoints, &self.config.probe) => report?,
            signal = &mut shutdown => {
                info!(signal, "Termination signal received during connectivity probe");
                return Ok(());
            }
        };
        debug!(
            brokers = ?report.brokers,
            topics = report.topics.len(),
            attempts = report.attempts,
            "Cluster reachable"
        );

        let group = KafkaGroup::join(&client_config)?;
        debug!(topic = group.topic(), "Consumer group client ready");

        let (consumer, ready) = ChangeConsumer::new(
            Arc::new(LoggingDispatcher::new()),
            self.config.logging.include_payload,
        );

        supervise(
            Arc::new(group),
            Arc::new(consumer),
            ready,
            CancellationToken::new(),
            shutdown,
        )
        .await
    }
}

/// Drive `group` until `shutdown` resolves or `cancel` fires
///
/// The consume loop runs in a background task and is restarted after every
/// generation that ends without cancellation. A consume error cancels
/// `cancel`. A signal that arrives before readiness shuts down right away.
/// Once the loop has stopped the group is closed; the consume error, if
/// any, is returned ahead of a close error.
pub async fn supervise<S>(
    group: Arc<dyn ConsumerGroup>,
    consumer: Arc<ChangeConsumer>,
    ready: ReadySignal,
    cancel: CancellationToken,
    shutdown: S,
) -> Result<(), CdcError>
where
    S: Future<Output = &'static str> + Send,
{
    let background = tokio::spawn(consume_loop(
        Arc::clone(&group),
        Arc::clone(&consumer),
        cancel.clone(),
    ));

    tokio::pin!(shutdown);
    let mut early_signal = None;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => debug!("Cancelled before the consumer became ready"),
        signal = &mut shutdown => early_signal = Some(signal),
        fired = ready.wait() => {
            if fired {
                info!("Consumer up and running");
            }
        }
    }

    match early_signal {
        Some(signal) => {
            info!(signal, "Termination signal received before readiness; shutting down")
        }
        None => tokio::select! {
            _ = cancel.cancelled() => info!("Cancellation requested; shutting down"),
            signal = &mut shutdown => info!(signal, "Termination signal received; shutting down"),
        },
    }
    cancel.cancel();

    let consumed = match background.await {
        Ok(result) => result,
        Err(e) => Err(CdcError::ConsumeLoop(e.to_string())),
    };
    let closed = group.close().await;

    match (consumed, closed) {
        (Err(e), closed) => {
            if let Err(close_error) = closed {
                warn!(error = %close_error, "Closing consumer group also failed");
            }
            Err(e)
        }
        (Ok(()), Err(e)) => {
            error!(error = %e, "Error closing consumer group");
            Err(e)
        }
        (Ok(()), Ok(())) => {
            info!("Consumer group closed");
            Ok(())
        }
    }
}

async fn consume_loop(
    group: Arc<dyn ConsumerGroup>,
    consumer: Arc<ChangeConsumer>,
    cancel: CancellationToken,
) -> Result<(), CdcError> {
    let handler: Arc<dyn GroupHandler> = consumer.clone();
    loop {
        if let Err(e) = group.consume(&cancel, Arc::clone(&handler)).await {
            error!(error = %e, "Error from consumer");
            cancel.cancel();
            return Err(e);
        }
        if cancel.is_cancelled() {
            debug!("Consume loop stopped");
            return Ok(());
        }

        let rejoined = consumer.rearm();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                fired = rejoined.wait() => {
                    if fired {
                        info!("Consumer rejoined after rebalance");
                    }
                }
            }
        });
    }
}

/// Resolve when the process receives an interrupt or terminate signal
///
/// Returns the name of the signal that won.
pub async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for interrupt signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for terminate signal");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
