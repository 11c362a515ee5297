//! Startup connectivity probe
//!
//! Verifies that the broker cluster is reachable before the consumer group
//! is joined: a probe attempt succeeds only when the broker set can be
//! enumerated (and is non-empty) and the topic catalog can be fetched.
//! Attempts are retried with a fixed interval up to a bounded count; on
//! exhaustion the last encountered error is returned.
//!
//! The network side sits behind [`BrokerConnector`] and [`ClusterConnection`]
//! so the retry policy can be exercised without a running cluster.

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProbeSettings;
use crate::kafka::config::KafkaClientConfig;
use crate::metrics;

/// Errors reported by a probe attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// No endpoints were supplied
    #[error("no broker endpoints configured")]
    NoEndpoints,

    /// The client could not be created or could not reach any broker
    #[error("failed to connect to Kafka: {0}")]
    Connect(String),

    /// The cluster answered but reported no brokers
    #[error("no Kafka brokers available")]
    NoBrokers,

    /// The topic catalog could not be fetched
    #[error("failed to get Kafka topics: {0}")]
    Metadata(String),
}

/// Outcome of a successful probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Brokers reported by the cluster as `host:port`
    pub brokers: Vec<String>,
    /// Topic names in the catalog
    pub topics: Vec<String>,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Opens short-lived connections to a broker cluster
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a connection using the given endpoints
    async fn connect(&self, endpoints: &[String]) -> Result<Box<dyn ClusterConnection>, ProbeError>;
}

/// A connection able to answer the two probe questions
#[async_trait]
pub trait ClusterConnection: Send {
    /// Enumerate the brokers known to the cluster
    async fn brokers(&mut self) -> Result<Vec<String>, ProbeError>;

    /// Fetch the topic catalog
    async fn topics(&mut self) -> Result<Vec<String>, ProbeError>;

    /// Release the connection
    async fn close(&mut self);
}

/// Probe the cluster behind `endpoints` until it answers or attempts run out.
///
/// Performs at most `settings.max_attempts` attempts and sleeps
/// `settings.retry_interval()` between failed attempts, never after the
/// last one. A `max_attempts` of zero is treated as a single attempt.
///
/// # Errors
///
/// Returns `ProbeError::NoEndpoints` immediately for an empty endpoint list,
/// otherwise the error of the final failed attempt.
///
/// # Examples
///
/// ```rust,no_run
/// use cdcwatch::config::Config;
/// use cdcwatch::kafka::config::KafkaClientConfig;
/// use cdcwatch::probe::{probe, KafkaConnector};
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = Config::default();
/// let client = KafkaClientConfig::from_settings(&config.kafka)?;
/// let connector = KafkaConnector::new(client, config.probe.timeout());
/// let report = probe(&connector, &config.kafka.endpoints(), &config.probe).await?;
/// println!("{} brokers", report.brokers.len());
/// # Ok(())
/// # }
/// ```
pub async fn probe<C>(
    connector: &C,
    endpoints: &[String],
    settings: &ProbeSettings,
) -> Result<ProbeReport, ProbeError>
where
    C: BrokerConnector + ?Sized,
{
    if endpoints.is_empty() {
        return Err(ProbeError::NoEndpoints);
    }

    let max_attempts = settings.max_attempts.max(1);
    let retry_interval = settings.retry_interval();
    let mut last_error = ProbeError::NoEndpoints;

    for attempt in 1..=max_attempts {
        info!(attempt, max_attempts, "Attempting to connect to Kafka");

        match probe_once(connector, endpoints).await {
            Ok((brokers, topics)) => {
                metrics::record_probe_attempt("success");
                info!(
                    attempt,
                    brokers = brokers.len(),
                    topics = topics.len(),
                    "Kafka is ready"
                );
                return Ok(ProbeReport {
                    brokers,
                    topics,
                    attempts: attempt,
                });
            }
            Err(e) => {
                metrics::record_probe_attempt("failure");
                warn!(attempt, max_attempts, error = %e, "Kafka connectivity attempt failed");
                last_error = e;
                if attempt < max_attempts {
                    info!(retry_in = ?retry_interval, "Retrying Kafka connection");
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    Err(last_error)
}

async fn probe_once<C>(
    connector: &C,
    endpoints: &[String],
) -> Result<(Vec<String>, Vec<String>), ProbeError>
where
    C: BrokerConnector + ?Sized,
{
    let mut connection = connector.connect(endpoints).await?;
    let result = check_cluster(connection.as_mut()).await;
    connection.close().await;
    result
}

async fn check_cluster(
    connection: &mut dyn ClusterConnection,
) -> Result<(Vec<String>, Vec<String>), ProbeError> {
    let brokers = connection.brokers().await?;
    if brokers.is_empty() {
        return Err(ProbeError::NoBrokers);
    }
    let topics = connection.topics().await?;
    Ok((brokers, topics))
}

/// [`BrokerConnector`] backed by an `rdkafka` metadata client
///
/// Each connection is a fresh `BaseConsumer` that never joins a group; it is
/// distinct from the client used by the consumer group.
pub struct KafkaConnector {
    config: KafkaClientConfig,
    timeout: Duration,
}

impl KafkaConnector {
    /// Create a connector with a per-request metadata timeout
    pub fn new(config: KafkaClientConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect(&self, endpoints: &[String]) -> Result<Box<dyn ClusterConnection>, ProbeError> {
        let mut properties = self.config.probe_properties(self.timeout);
        properties.retain(|(key, _)| key != "bootstrap.servers");
        properties.push(("bootstrap.servers".to_string(), endpoints.join(",")));

        let client: BaseConsumer = KafkaClientConfig::client_config(&properties)
            .create()
            .map_err(|e| ProbeError::Connect(e.to_string()))?;
        debug!(endpoints = %endpoints.join(","), "Created probe client");

        Ok(Box::new(KafkaConnection {
            client: Some(Arc::new(client)),
            timeout: self.timeout,
        }))
    }
}

struct KafkaConnection {
    client: Option<Arc<BaseConsumer>>,
    timeout: Duration,
}

impl KafkaConnection {
    /// Runs a blocking metadata request off the async runtime
    async fn metadata<T, F>(&self, extract: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&rdkafka::metadata::Metadata) -> T + Send + 'static,
    {
        let client = self
            .client
            .clone()
            .ok_or_else(|| "connection already closed".to_string())?;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            client
                .fetch_metadata(None, timeout)
                .map(|metadata| extract(&metadata))
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[async_trait]
impl ClusterConnection for KafkaConnection {
    async fn brokers(&mut self) -> Result<Vec<String>, ProbeError> {
        self.metadata(|metadata| {
            metadata
                .brokers()
                .iter()
                .map(|b| format!("{}:{}", b.host(), b.port()))
                .collect()
        })
        .await
        .map_err(ProbeError::Connect)
    }

    async fn topics(&mut self) -> Result<Vec<String>, ProbeError> {
        let topics = self
            .metadata(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .map(|t| (t.name().to_string(), t.error()))
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(ProbeError::Metadata)?;

        Ok(topics
            .into_iter()
            .filter_map(|(name, error)| match error {
                None => Some(name),
                Some(code) => {
                    debug!(topic = %name, error = ?code, "Skipping topic with metadata error");
                    None
                }
            })
            .collect())
    }

    async fn close(&mut self) {
        self.client.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use std::sync::atomic::{AtomicU32, Ordering};

    mock! {
        pub Connector {}

        #[async_trait]
        impl BrokerConnector for Connector {
            async fn connect(&self, endpoints: &[String]) -> Result<Box<dyn ClusterConnection>, ProbeError>;
        }
    }

    mock! {
        pub Connection {}

        #[async_trait]
        impl ClusterConnection for Connection {
            async fn brokers(&mut self) -> Result<Vec<String>, ProbeError>;
            async fn topics(&mut self) -> Result<Vec<String>, ProbeError>;
            async fn close(&mut self);
        }
    }

    fn settings(max_attempts: u32, retry_interval_secs: u64) -> ProbeSettings {
        ProbeSettings {
            max_attempts,
            retry_interval_secs,
            ..Default::default()
        }
    }

    fn endpoints() -> Vec<String> {
        vec!["kafka:29092".to_string()]
    }

    fn healthy_connection() -> MockConnection {
        let mut conn = MockConnection::new();
        conn.expect_brokers()
            .returning(|| Ok(vec!["kafka:29092".to_string()]));
        conn.expect_topics()
            .returning(|| Ok(vec!["mongodb.testdb.users".to_string()]));
        conn.expect_close().times(1).returning(|| ());
        conn
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_exhaustion_returns_last_error() {
        let mut connector = MockConnector::new();
        let mut calls = 0;
        connector.expect_connect().times(4).returning(move |_| {
            calls += 1;
            Err(ProbeError::Connect(format!("refused #{}", calls)))
        });

        let start = tokio::time::Instant::now();
        let result = probe(&connector, &endpoints(), &settings(4, 5)).await;

        assert_eq!(result, Err(ProbeError::Connect("refused #4".to_string())));
        // three sleeps between four attempts, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_single_attempt_never_sleeps() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Err(ProbeError::Connect("refused".to_string())));

        let start = tokio::time::Instant::now();
        let result = probe(&connector, &endpoints(), &settings(1, 30)).await;

        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_succeeds_after_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let mut connector = MockConnector::new();
        connector.expect_connect().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProbeError::Connect("broker not ready".to_string()))
            } else {
                Ok(Box::new(healthy_connection()) as Box<dyn ClusterConnection>)
            }
        });

        let report = probe(&connector, &endpoints(), &settings(10, 5))
            .await
            .expect("probe should succeed");

        assert_eq!(report.attempts, 3);
        assert_eq!(report.brokers, vec!["kafka:29092".to_string()]);
        assert_eq!(report.topics, vec!["mongodb.testdb.users".to_string()]);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_empty_broker_list_is_a_failure() {
        let mut connector = MockConnector::new();
        connector.expect_connect().times(2).returning(|_| {
            let mut conn = MockConnection::new();
            conn.expect_brokers().returning(|| Ok(Vec::new()));
            conn.expect_topics().never();
            conn.expect_close().times(1).returning(|| ());
            Ok(Box::new(conn) as Box<dyn ClusterConnection>)
        });

        let result = probe(&connector, &endpoints(), &settings(2, 1)).await;
        assert_eq!(result, Err(ProbeError::NoBrokers));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_topic_failure_closes_connection() {
        let mut connector = MockConnector::new();
        connector.expect_connect().times(1).returning(|_| {
            let mut conn = MockConnection::new();
            conn.expect_brokers()
                .returning(|| Ok(vec!["kafka:29092".to_string()]));
            conn.expect_topics()
                .returning(|| Err(ProbeError::Metadata("timed out".to_string())));
            conn.expect_close().times(1).returning(|| ());
            Ok(Box::new(conn) as Box<dyn ClusterConnection>)
        });

        let result = probe(&connector, &endpoints(), &settings(1, 1)).await;
        assert_eq!(result, Err(ProbeError::Metadata("timed out".to_string())));
    }

    #[tokio::test]
    async fn test_probe_rejects_empty_endpoints() {
        let mut connector = MockConnector::new();
        connector.expect_connect().never();

        let result = probe(&connector, &[], &settings(3, 1)).await;
        assert_eq!(result, Err(ProbeError::NoEndpoints));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_zero_attempts_still_tries_once() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Err(ProbeError::Connect("refused".to_string())));

        let result = probe(&connector, &endpoints(), &settings(0, 1)).await;
        assert!(matches!(result, Err(ProbeError::Connect(_))));
    }

    #[test]
    fn test_probe_error_display() {
        assert_eq!(
            ProbeError::NoBrokers.to_string(),
            "no Kafka brokers available"
        );
        assert_eq!(
            ProbeError::Metadata("boom".to_string()).to_string(),
            "failed to get Kafka topics: boom"
        );
    }

    fn connector_for(bootstrap: &str, timeout: Duration) -> KafkaConnector {
        let settings = crate::test_utils::kafka_settings(bootstrap, "mongodb.testdb.users", "g");
        let config = KafkaClientConfig::from_settings(&settings).unwrap();
        KafkaConnector::new(config, timeout)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kafka_connector_reads_cluster_metadata() {
        let cluster = crate::test_utils::mock_cluster("mongodb.testdb.users", 1);
        let bootstrap = cluster.bootstrap_servers();
        let connector = connector_for(&bootstrap, Duration::from_secs(10));

        let report = probe(&connector, &[bootstrap], &settings(1, 1))
            .await
            .unwrap();

        assert_eq!(report.attempts, 1);
        assert_eq!(report.brokers.len(), 1);
        assert!(report.topics.contains(&"mongodb.testdb.users".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kafka_connector_unreachable_cluster_fails() {
        let connector = connector_for("127.0.0.1:1", Duration::from_secs(1));

        let result = probe(&connector, &["127.0.0.1:1".to_string()], &settings(1, 1)).await;

        assert!(matches!(result, Err(ProbeError::Connect(_))));
    }
}
