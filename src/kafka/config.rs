//! Kafka client configuration.
//!
//! Translates the user-facing [`KafkaSettings`] into typed client settings
//! and finally into `rdkafka` key-value properties. Two property sets are
//! produced: one for the short-lived metadata client used by the
//! connectivity probe and one for the long-lived consumer group client.
//!
//! # Example
//!
//! ```rust
//! use cdcwatch::config::KafkaSettings;
//! use cdcwatch::kafka::config::KafkaClientConfig;
//!
//! let settings = KafkaSettings::default();
//! let config = KafkaClientConfig::from_settings(&settings).unwrap();
//! let props: std::collections::HashMap<_, _> = config.group_properties().into_iter().collect();
//! assert_eq!(props["auto.offset.reset"], "earliest");
//! assert_eq!(props["partition.assignment.strategy"], "roundrobin");
//! ```

use rdkafka::config::ClientConfig;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::config::KafkaSettings;

/// Errors that can occur while building client configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Missing required configuration value.
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    /// Invalid security protocol specified.
    #[error("Invalid security protocol: {0}")]
    InvalidSecurityProtocol(String),

    /// Invalid SASL mechanism specified.
    #[error("Invalid SASL mechanism: {0}")]
    InvalidSaslMechanism(String),
}

/// Security protocol for Kafka connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityProtocol {
    /// No encryption or authentication.
    #[default]
    Plaintext,
    /// TLS encryption without SASL.
    Ssl,
    /// SASL authentication without TLS.
    SaslPlaintext,
    /// SASL authentication with TLS encryption.
    SaslSsl,
}

impl SecurityProtocol {
    /// Returns the Kafka configuration string for this protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::Ssl => "SSL",
            Self::SaslPlaintext => "SASL_PLAINTEXT",
            Self::SaslSsl => "SASL_SSL",
        }
    }

    fn uses_sasl(&self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }
}

impl FromStr for SecurityProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PLAINTEXT" => Ok(Self::Plaintext),
            "SSL" => Ok(Self::Ssl),
            "SASL_PLAINTEXT" => Ok(Self::SaslPlaintext),
            "SASL_SSL" => Ok(Self::SaslSsl),
            _ => Err(ConfigError::InvalidSecurityProtocol(s.to_string())),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaslMechanism {
    /// PLAIN mechanism (username/password in clear text).
    Plain,
    /// SCRAM-SHA-256 mechanism.
    #[default]
    ScramSha256,
    /// SCRAM-SHA-512 mechanism.
    ScramSha512,
}

impl SaslMechanism {
    /// Returns the Kafka configuration string for this mechanism.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

impl FromStr for SaslMechanism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "SCRAM-SHA-256" => Ok(Self::ScramSha256),
            "SCRAM-SHA-512" => Ok(Self::ScramSha512),
            _ => Err(ConfigError::InvalidSaslMechanism(s.to_string())),
        }
    }
}

/// SASL credentials and mechanism.
#[derive(Debug, Clone)]
pub struct SaslConfig {
    /// Authentication mechanism to use.
    pub mechanism: SaslMechanism,
    /// SASL username.
    pub username: String,
    /// SASL password.
    pub password: String,
}

/// Typed Kafka client configuration shared by the probe and the group.
#[derive(Debug, Clone)]
pub struct KafkaClientConfig {
    /// Broker endpoints, in configured order.
    pub endpoints: Vec<String>,

    /// Subscribed topic.
    pub topic: String,

    /// Consumer group ID.
    pub group_id: String,

    /// Group session timeout.
    pub session_timeout: Duration,

    /// Heartbeat interval.
    pub heartbeat_interval: Duration,

    /// Per-partition buffered message count.
    pub channel_capacity: usize,

    /// Security protocol for the connection.
    pub security_protocol: SecurityProtocol,

    /// SASL configuration (required for SASL protocols).
    pub sasl_config: Option<SaslConfig>,

    /// CA certificate path for TLS.
    pub ssl_ca_location: Option<String>,
}

/// Accepted range of `socket.timeout.ms`.
const SOCKET_TIMEOUT_MS: (u128, u128) = (10, 300_000);
/// Accepted range of `socket.connection.setup.timeout.ms`.
const CONNECTION_SETUP_TIMEOUT_MS: (u128, u128) = (1_000, i32::MAX as u128);

impl KafkaClientConfig {
    /// Builds typed client configuration from settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidSecurityProtocol` or
    /// `ConfigError::InvalidSaslMechanism` for unknown names and
    /// `ConfigError::MissingConfig` when a SASL protocol lacks credentials.
    pub fn from_settings(settings: &KafkaSettings) -> Result<Self, ConfigError> {
        let mut config = Self {
            endpoints: settings.endpoints(),
            topic: settings.topic.clone(),
            group_id: settings.group_id.clone(),
            session_timeout: Duration::from_millis(settings.session_timeout_ms),
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            channel_capacity: settings.channel_capacity,
            security_protocol: SecurityProtocol::default(),
            sasl_config: None,
            ssl_ca_location: None,
        };

        let Some(security) = &settings.security else {
            return Ok(config);
        };

        config.security_protocol = security.protocol.parse()?;
        config.ssl_ca_location = security.ssl_ca_location.clone();

        if config.security_protocol.uses_sasl() {
            let username = security
                .sasl_username
                .clone()
                .ok_or_else(|| ConfigError::MissingConfig("sasl_username".to_string()))?;
            let password = security
                .sasl_password
                .clone()
                .ok_or_else(|| ConfigError::MissingConfig("sasl_password".to_string()))?;
            let mechanism = match &security.sasl_mechanism {
                Some(m) => m.parse()?,
                None => SaslMechanism::default(),
            };
            config.sasl_config = Some(SaslConfig {
                mechanism,
                username,
                password,
            });
        }

        Ok(config)
    }

    /// Comma-joined endpoint list as expected by `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        self.endpoints.join(",")
    }

    fn common_properties(&self) -> Vec<(String, String)> {
        let mut settings = vec![
            ("bootstrap.servers".to_string(), self.bootstrap_servers()),
            (
                "security.protocol".to_string(),
                self.security_protocol.as_str().to_string(),
            ),
        ];

        if let Some(sasl) = &self.sasl_config {
            settings.push((
                "sasl.mechanism".to_string(),
                sasl.mechanism.as_str().to_string(),
            ));
            settings.push(("sasl.username".to_string(), sasl.username.clone()));
            settings.push(("sasl.password".to_string(), sasl.password.clone()));
        }

        if let Some(ca) = &self.ssl_ca_location {
            settings.push(("ssl.ca.location".to_string(), ca.clone()));
        }

        settings
    }

    /// Properties for the short-lived metadata client used by the probe.
    ///
    /// The probe client never joins a group; `timeout` bounds socket and
    /// connection setup the same way a dial timeout would. Values are
    /// clamped to the range the client library accepts.
    pub fn probe_properties(&self, timeout: Duration) -> Vec<(String, String)> {
        let mut settings = self.common_properties();
        let clamped = |(min, max): (u128, u128)| timeout.as_millis().clamp(min, max).to_string();
        settings.push(("client.id".to_string(), "cdcwatch-probe".to_string()));
        settings.push(("socket.timeout.ms".to_string(), clamped(SOCKET_TIMEOUT_MS)));
        settings.push((
            "socket.connection.setup.timeout.ms".to_string(),
            clamped(CONNECTION_SETUP_TIMEOUT_MS),
        ));
        settings
    }

    /// Properties for the consumer group client.
    ///
    /// Offsets are stored explicitly after each handled message and flushed
    /// by the client's commit timer; unknown partitions start from the
    /// oldest retained offset.
    pub fn group_properties(&self) -> Vec<(String, String)> {
        let mut settings = self.common_properties();
        settings.extend([
            ("group.id".to_string(), self.group_id.clone()),
            (
                "client.id".to_string(),
                format!("cdcwatch-{}", self.group_id),
            ),
            (
                "partition.assignment.strategy".to_string(),
                "roundrobin".to_string(),
            ),
            ("auto.offset.reset".to_string(), "earliest".to_string()),
            ("enable.auto.commit".to_string(), "true".to_string()),
            ("enable.auto.offset.store".to_string(), "false".to_string()),
            ("enable.partition.eof".to_string(), "false".to_string()),
            (
                "session.timeout.ms".to_string(),
                self.session_timeout.as_millis().to_string(),
            ),
            (
                "heartbeat.interval.ms".to_string(),
                self.heartbeat_interval.as_millis().to_string(),
            ),
        ]);
        settings
    }

    /// Builds an `rdkafka` [`ClientConfig`] from a property list.
    pub fn client_config(properties: &[(String, String)]) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        for (key, value) in properties {
            client_config.set(key, value);
        }
        client_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaSecuritySettings;
    use std::collections::HashMap;

    fn props(list: Vec<(String, String)>) -> HashMap<String, String> {
        list.into_iter().collect()
    }

    #[test]
    fn test_from_default_settings() {
        let config = KafkaClientConfig::from_settings(&KafkaSettings::default()).unwrap();
        assert_eq!(config.endpoints, vec!["kafka:29092".to_string()]);
        assert_eq!(config.security_protocol, SecurityProtocol::Plaintext);
        assert!(config.sasl_config.is_none());
        assert_eq!(config.session_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_group_properties() {
        let mut settings = KafkaSettings::default();
        settings.brokers = "k1:9092, k2:9092".to_string();
        settings.group_id = "audit".to_string();
        let config = KafkaClientConfig::from_settings(&settings).unwrap();
        let map = props(config.group_properties());

        assert_eq!(map["bootstrap.servers"], "k1:9092,k2:9092");
        assert_eq!(map["group.id"], "audit");
        assert_eq!(map["partition.assignment.strategy"], "roundrobin");
        assert_eq!(map["auto.offset.reset"], "earliest");
        assert_eq!(map["enable.auto.offset.store"], "false");
        assert_eq!(map["session.timeout.ms"], "30000");
        assert_eq!(map["security.protocol"], "PLAINTEXT");
    }

    #[test]
    fn test_probe_properties_have_no_group() {
        let config = KafkaClientConfig::from_settings(&KafkaSettings::default()).unwrap();
        let map = props(config.probe_properties(Duration::from_secs(10)));

        assert!(!map.contains_key("group.id"));
        assert_eq!(map["socket.timeout.ms"], "10000");
        assert_eq!(map["bootstrap.servers"], "kafka:29092");
    }

    #[test]
    fn test_probe_timeouts_are_clamped() {
        let config = KafkaClientConfig::from_settings(&KafkaSettings::default()).unwrap();

        let long = props(config.probe_properties(Duration::from_secs(600)));
        assert_eq!(long["socket.timeout.ms"], "300000");
        assert_eq!(long["socket.connection.setup.timeout.ms"], "600000");

        let short = props(config.probe_properties(Duration::from_millis(0)));
        assert_eq!(short["socket.timeout.ms"], "10");
        assert_eq!(short["socket.connection.setup.timeout.ms"], "1000");

        // the client must accept the clamped values
        assert!(KafkaClientConfig::client_config(&long.clone().into_iter().collect::<Vec<_>>())
            .create::<rdkafka::consumer::BaseConsumer>()
            .is_ok());
    }

    #[test]
    fn test_sasl_settings() {
        let mut settings = KafkaSettings::default();
        settings.security = Some(KafkaSecuritySettings {
            protocol: "sasl_ssl".to_string(),
            sasl_mechanism: Some("scram-sha-512".to_string()),
            sasl_username: Some("user".to_string()),
            sasl_password: Some("pass".to_string()),
            ssl_ca_location: Some("/path/to/ca.pem".to_string()),
        });
        let config = KafkaClientConfig::from_settings(&settings).unwrap();
        let map = props(config.group_properties());

        assert_eq!(map["security.protocol"], "SASL_SSL");
        assert_eq!(map["sasl.mechanism"], "SCRAM-SHA-512");
        assert_eq!(map["sasl.username"], "user");
        assert_eq!(map["sasl.password"], "pass");
        assert_eq!(map["ssl.ca.location"], "/path/to/ca.pem");
    }

    #[test]
    fn test_sasl_requires_credentials() {
        let mut settings = KafkaSettings::default();
        settings.security = Some(KafkaSecuritySettings {
            protocol: "SASL_PLAINTEXT".to_string(),
            ..Default::default()
        });
        let result = KafkaClientConfig::from_settings(&settings);
        assert!(matches!(result, Err(ConfigError::MissingConfig(_))));
    }

    #[test]
    fn test_invalid_protocol() {
        let result: Result<SecurityProtocol, _> = "INVALID".parse();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidSecurityProtocol(_))
        ));
    }

    #[test]
    fn test_protocol_and_mechanism_strings() {
        assert_eq!(SecurityProtocol::SaslPlaintext.as_str(), "SASL_PLAINTEXT");
        assert_eq!(SaslMechanism::ScramSha256.as_str(), "SCRAM-SHA-256");
        assert_eq!("plain".parse::<SaslMechanism>().unwrap(), SaslMechanism::Plain);
    }
}
