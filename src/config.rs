//! Configuration management for cdcwatch
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! Precedence, lowest first: built-in defaults, YAML file, environment,
//! command-line flags.

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for cdcwatch
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Kafka connection and consumer group settings
    #[serde(default)]
    pub kafka: KafkaSettings,
    /// Startup connectivity probe settings
    #[serde(default)]
    pub probe: ProbeSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Kafka connection and consumer group settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSettings {
    /// Kafka brokers (comma-separated host:port list)
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Topic to subscribe to
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group ID
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Group session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Buffered messages per claimed partition
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Security configuration
    #[serde(default)]
    pub security: Option<KafkaSecuritySettings>,
}

impl KafkaSettings {
    /// Returns the broker endpoint list parsed from the comma-separated value.
    ///
    /// Entries are trimmed and empty entries are dropped; order is preserved.
    ///
    /// # Examples
    ///
    /// ```
    /// use cdcwatch::config::KafkaSettings;
    ///
    /// let mut settings = KafkaSettings::default();
    /// settings.brokers = "kafka1:9092, kafka2:9092,".to_string();
    /// assert_eq!(settings.endpoints(), vec!["kafka1:9092", "kafka2:9092"]);
    /// ```
    pub fn endpoints(&self) -> Vec<String> {
        parse_endpoints(&self.brokers)
    }
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            group_id: default_group_id(),
            session_timeout_ms: default_session_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            channel_capacity: default_channel_capacity(),
            security: None,
        }
    }
}

/// Kafka security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KafkaSecuritySettings {
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL)
    pub protocol: String,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password (prefer env var KAFKA_SASL_PASSWORD)
    pub sasl_password: Option<String>,

    /// Path to CA certificate file
    pub ssl_ca_location: Option<String>,
}

/// Startup connectivity probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Maximum number of connection attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in seconds
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Per-request network timeout in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProbeSettings {
    /// Delay between failed attempts
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Network timeout for a single metadata request
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_secs: default_retry_interval_secs(),
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,

    /// Log file path (if None, STDOUT only)
    pub file_path: Option<PathBuf>,

    /// Include raw message payloads in claim logs
    #[serde(default)]
    pub include_payload: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
            include_payload: false,
        }
    }
}

/// Command-line overrides applied on top of file and environment values
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Broker list override
    pub brokers: Option<String>,
    /// Topic override
    pub topic: Option<String>,
    /// Group ID override
    pub group_id: Option<String>,
    /// Probe attempt override
    pub max_attempts: Option<u32>,
    /// Probe interval override
    pub retry_interval_secs: Option<u64>,
    /// Force JSON log output
    pub json_logs: bool,
    /// Log file override
    pub log_file: Option<PathBuf>,
    /// Force payload logging
    pub include_payload: bool,
    /// Verbose logging
    pub verbose: bool,
}

fn default_brokers() -> String {
    "kafka:29092".to_string()
}

fn default_topic() -> String {
    "mongodb.testdb.users".to_string()
}

fn default_group_id() -> String {
    "cdcwatch-consumer-group".to_string()
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    3_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_interval_secs() -> u64 {
    5
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

const VALID_PROTOCOLS: [&str; 4] = ["PLAINTEXT", "SSL", "SASL_PLAINTEXT", "SASL_SSL"];
const VALID_MECHANISMS: [&str; 3] = ["PLAIN", "SCRAM-SHA-256", "SCRAM-SHA-512"];

/// Split a comma-separated broker list into trimmed, non-empty endpoints.
pub fn parse_endpoints(brokers: &str) -> Vec<String> {
    brokers
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, overrides: &Overrides) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_overrides(overrides);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CdcError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| CdcError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(brokers) = std::env::var("KAFKA_BROKERS") {
            if !brokers.trim().is_empty() {
                self.kafka.brokers = brokers;
            }
        }

        if let Ok(topic) = std::env::var("KAFKA_TOPIC") {
            if !topic.trim().is_empty() {
                self.kafka.topic = topic;
            }
        }

        if let Ok(group_id) = std::env::var("KAFKA_GROUP_ID") {
            if !group_id.trim().is_empty() {
                self.kafka.group_id = group_id;
            }
        }

        if let Ok(attempts) = std::env::var("CDCWATCH_PROBE_MAX_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(v) => self.probe.max_attempts = v,
                Err(_) => tracing::warn!("Invalid CDCWATCH_PROBE_MAX_ATTEMPTS: {}", attempts),
            }
        }

        if let Ok(interval) = std::env::var("CDCWATCH_PROBE_RETRY_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(v) => self.probe.retry_interval_secs = v,
                Err(_) => tracing::warn!(
                    "Invalid CDCWATCH_PROBE_RETRY_INTERVAL_SECS: {}",
                    interval
                ),
            }
        }

        if let Ok(level) = std::env::var("CDCWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json_logs) = std::env::var("CDCWATCH_JSON_LOGS") {
            match json_logs.parse::<bool>() {
                Ok(v) => self.logging.json_format = v,
                Err(_) => tracing::warn!("Invalid value for CDCWATCH_JSON_LOGS: {}", json_logs),
            }
        }

        if let Ok(log_file) = std::env::var("CDCWATCH_LOG_FILE") {
            self.logging.file_path = Some(PathBuf::from(log_file));
        }

        if let Ok(include_payload) = std::env::var("CDCWATCH_INCLUDE_PAYLOAD") {
            match include_payload.parse::<bool>() {
                Ok(v) => self.logging.include_payload = v,
                Err(_) => tracing::warn!(
                    "Invalid value for CDCWATCH_INCLUDE_PAYLOAD: {}",
                    include_payload
                ),
            }
        }

        // Security settings populate or override kafka.security
        if let Ok(protocol) = std::env::var("KAFKA_SECURITY_PROTOCOL") {
            let security = self
                .kafka
                .security
                .get_or_insert_with(KafkaSecuritySettings::default);
            security.protocol = protocol;
            tracing::debug!("Populated kafka.security from KAFKA_SECURITY_PROTOCOL");
        }

        if let Some(security) = self.kafka.security.as_mut() {
            if let Ok(mechanism) = std::env::var("KAFKA_SASL_MECHANISM") {
                security.sasl_mechanism = Some(mechanism);
            }
            if let Ok(username) = std::env::var("KAFKA_SASL_USERNAME") {
                security.sasl_username = Some(username);
            }
            if let Ok(password) = std::env::var("KAFKA_SASL_PASSWORD") {
                security.sasl_password = Some(password);
            }
            if let Ok(ca) = std::env::var("KAFKA_SSL_CA_LOCATION") {
                security.ssl_ca_location = Some(ca);
            }
        }
    }

    /// Apply command-line overrides
    ///
    /// Blank values count as unset, so an exported but empty environment
    /// variable picked up by the argument parser keeps the current value.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(brokers) = non_blank(&overrides.brokers) {
            self.kafka.brokers = brokers.to_string();
        }
        if let Some(topic) = non_blank(&overrides.topic) {
            self.kafka.topic = topic.to_string();
        }
        if let Some(group_id) = non_blank(&overrides.group_id) {
            self.kafka.group_id = group_id.to_string();
        }
        if let Some(attempts) = overrides.max_attempts {
            self.probe.max_attempts = attempts;
        }
        if let Some(interval) = overrides.retry_interval_secs {
            self.probe.retry_interval_secs = interval;
        }
        if overrides.json_logs {
            self.logging.json_format = true;
        }
        if let Some(log_file) = overrides.log_file.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            self.logging.file_path = Some(log_file.clone());
        }
        if overrides.include_payload {
            self.logging.include_payload = true;
        }
        if overrides.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.kafka.endpoints().is_empty() {
            return Err(CdcError::Config("kafka.brokers cannot be empty".to_string()).into());
        }

        if self.kafka.topic.trim().is_empty() {
            return Err(CdcError::Config("kafka.topic cannot be empty".to_string()).into());
        }

        if self.kafka.group_id.trim().is_empty() {
            return Err(CdcError::Config("kafka.group_id cannot be empty".to_string()).into());
        }

        if self.kafka.channel_capacity == 0 {
            return Err(CdcError::Config(
                "kafka.channel_capacity must be greater than 0".to_string(),
            )
            .into());
        }

        if self.kafka.heartbeat_interval_ms >= self.kafka.session_timeout_ms {
            return Err(CdcError::Config(
                "kafka.heartbeat_interval_ms must be lower than kafka.session_timeout_ms"
                    .to_string(),
            )
            .into());
        }

        if let Some(security) = &self.kafka.security {
            let protocol = security.protocol.to_uppercase();
            if !VALID_PROTOCOLS.contains(&protocol.as_str()) {
                return Err(CdcError::Config(format!(
                    "Invalid security protocol: {}. Must be one of: {}",
                    security.protocol,
                    VALID_PROTOCOLS.join(", ")
                ))
                .into());
            }
            if let Some(mechanism) = &security.sasl_mechanism {
                if !VALID_MECHANISMS.contains(&mechanism.to_uppercase().as_str()) {
                    return Err(CdcError::Config(format!(
                        "Invalid SASL mechanism: {}. Must be one of: {}",
                        mechanism,
                        VALID_MECHANISMS.join(", ")
                    ))
                    .into());
                }
            }
        }

        if self.probe.max_attempts == 0 {
            return Err(
                CdcError::Config("probe.max_attempts must be greater than 0".to_string()).into(),
            );
        }

        if self.probe.timeout_secs == 0 {
            return Err(
                CdcError::Config("probe.timeout_secs must be greater than 0".to_string()).into(),
            );
        }

        Ok(())
    }
}
