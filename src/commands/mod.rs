/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes two top-level command modules:

- `watch` — Full consumer lifecycle
- `probe` — One-shot connectivity check

Both take an already loaded and validated [`Config`].
*/

use crate::config::Config;
use crate::error::Result;

// Watch command handler
pub mod watch {
    //! Consumer lifecycle handler.
    //!
    //! Builds a [`Watcher`] from configuration and runs it until a
    //! termination signal or a fatal error.

    use super::*;
    use crate::watcher::Watcher;

    /// Run the CDC watcher
    ///
    /// # Errors
    ///
    /// Returns any fatal lifecycle error: probe exhaustion, group join
    /// failure, consume failure, or close failure.
    pub async fn run_watch(config: Config) -> Result<()> {
        tracing::info!(
            topic = %config.kafka.topic,
            group_id = %config.kafka.group_id,
            include_payload = config.logging.include_payload,
            "Starting watcher mode"
        );

        Watcher::new(config).run().await?;

        tracing::info!("Watcher stopped");
        Ok(())
    }
}

// Probe command handler
pub mod probe {
    //! Connectivity check handler, suitable for container health checks.

    use super::*;
    use crate::error::CdcError;
    use crate::kafka::KafkaClientConfig;
    use crate::probe::{probe, KafkaConnector};

    /// Probe the configured cluster once (with retries) and report
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Probe` carrying the last attempt's failure.
    pub async fn run_probe(config: Config) -> Result<()> {
        let client = KafkaClientConfig::from_settings(&config.kafka)
            .map_err(|e| CdcError::Config(e.to_string()))?;
        let connector = KafkaConnector::new(client, config.probe.timeout());

        let report = probe(&connector, &config.kafka.endpoints(), &config.probe)
            .await
            .map_err(CdcError::from)?;

        tracing::info!(
            brokers = ?report.brokers,
            topics = report.topics.len(),
            attempts = report.attempts,
            "Kafka cluster reachable"
        );
        println!(
            "ok: {} broker(s), {} topic(s) after {} attempt(s)",
            report.brokers.len(),
            report.topics.len(),
            report.attempts
        );
        Ok(())
    }
}
