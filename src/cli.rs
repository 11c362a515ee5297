//! Command-line interface definition for cdcwatch
//!
//! This module defines the CLI structure using clap's derive API. Flags are
//! the highest-precedence configuration layer; see [`crate::config`].

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;

/// cdcwatch - change-data-capture event consumer
///
/// Joins a Kafka consumer group and logs every change event it claims.
#[derive(Parser, Debug, Clone)]
#[command(name = "cdcwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/cdcwatch.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for cdcwatch
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Probe the cluster, join the consumer group, and consume until signalled
    Watch {
        /// Kafka brokers (comma-separated host:port list)
        #[arg(long, env = "KAFKA_BROKERS")]
        brokers: Option<String>,

        /// Topic to consume
        #[arg(short, long, env = "KAFKA_TOPIC")]
        topic: Option<String>,

        /// Consumer group id
        #[arg(short, long, env = "KAFKA_GROUP_ID")]
        group_id: Option<String>,

        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,

        /// Also append logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Log raw message payloads
        #[arg(long)]
        include_payload: bool,
    },

    /// Check that the cluster is reachable, then exit
    Probe {
        /// Kafka brokers (comma-separated host:port list)
        #[arg(long, env = "KAFKA_BROKERS")]
        brokers: Option<String>,

        /// Number of connection attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Seconds to wait between attempts
        #[arg(long)]
        retry_interval_secs: Option<u64>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Configuration overrides carried by the flags
    pub fn to_overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            verbose: self.verbose,
            ..Default::default()
        };

        match &self.command {
            Commands::Watch {
                brokers,
                topic,
                group_id,
                json_logs,
                log_file,
                include_payload,
            } => {
                overrides.brokers = brokers.clone();
                overrides.topic = topic.clone();
                overrides.group_id = group_id.clone();
                overrides.json_logs = *json_logs;
                overrides.log_file = log_file.clone();
                overrides.include_payload = *include_payload;
            }
            Commands::Probe {
                brokers,
                max_attempts,
                retry_interval_secs,
            } => {
                overrides.brokers = brokers.clone();
                overrides.max_attempts = *max_attempts;
                overrides.retry_interval_secs = *retry_interval_secs;
            }
        }

        overrides
    }
}
