//! Kafka client integration
//!
//! Client configuration shared by the connectivity probe and the consumer
//! group, and the `rdkafka`-backed [`crate::group::ConsumerGroup`].

pub mod config;
pub mod group;

pub use config::{ConfigError, KafkaClientConfig, SaslConfig, SaslMechanism, SecurityProtocol};
pub use group::KafkaGroup;
