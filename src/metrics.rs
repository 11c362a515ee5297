//! Consumer metrics
//!
//! Counters and gauges emitted through the `metrics` facade. Nothing is
//! exported unless a recorder is installed; with the `prometheus` feature,
//! [`init_metrics_exporter`] installs the Prometheus exporter.
//!
//! # Metrics
//!
//! - `cdc_messages_total`: Counter of classified messages by kind
//! - `cdc_operations_total`: Counter of change envelopes by operation
//! - `cdc_commits_total`: Counter of messages marked committed
//! - `cdc_handler_errors_total`: Counter of dispatch failures
//! - `cdc_rebalances_total`: Counter of assignment and revocation events
//! - `cdc_probe_attempts_total`: Counter of probe attempts by outcome
//! - `cdc_active_claims`: Gauge of partition claims currently being consumed
//! - `cdc_claim_duration_seconds`: Histogram of partition claim lifetimes
//!
//! # Examples
//!
//! ```
//! use cdcwatch::metrics::ClaimMetrics;
//!
//! let claim = ClaimMetrics::new("mongodb.testdb.users", 0);
//! claim.record_commit();
//! assert_eq!(claim.committed(), 1);
//! ```

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Records a classified message of the given kind
pub fn record_message(kind: &'static str) {
    increment_counter!("cdc_messages_total", "kind" => kind);
}

/// Records a dispatched change envelope by operation name
pub fn record_operation(op: &'static str) {
    increment_counter!("cdc_operations_total", "op" => op);
}

/// Records a handler failure
pub fn record_handler_error() {
    increment_counter!("cdc_handler_errors_total");
}

/// Records a rebalance event (`assign`, `revoke` or `error`)
pub fn record_rebalance(kind: &'static str) {
    increment_counter!("cdc_rebalances_total", "kind" => kind);
}

/// Records a probe attempt outcome (`success` or `failure`)
pub fn record_probe_attempt(outcome: &'static str) {
    increment_counter!("cdc_probe_attempts_total", "outcome" => outcome);
}

/// Metrics for a single partition claim
///
/// Increments the active claim gauge on creation and decrements it on drop,
/// so the gauge stays accurate when a claim loop ends early.
#[derive(Debug)]
pub struct ClaimMetrics {
    topic: String,
    partition: i32,
    start: Instant,
    committed: AtomicU64,
}

impl ClaimMetrics {
    /// Starts tracking a claim on `topic`/`partition`
    pub fn new(topic: &str, partition: i32) -> Self {
        increment_gauge!("cdc_active_claims", 1.0, "topic" => topic.to_string());

        Self {
            topic: topic.to_string(),
            partition,
            start: Instant::now(),
            committed: AtomicU64::new(0),
        }
    }

    /// Records one message marked committed under this claim
    pub fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
        increment_counter!(
            "cdc_commits_total",
            "topic" => self.topic.clone(),
            "partition" => self.partition.to_string()
        );
    }

    /// Number of messages committed under this claim
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Partition this claim tracks
    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl Drop for ClaimMetrics {
    fn drop(&mut self) {
        histogram!(
            "cdc_claim_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "topic" => self.topic.clone()
        );
        decrement_gauge!("cdc_active_claims", 1.0, "topic" => self.topic.clone());
    }
}

/// Initializes the metrics exporter for Prometheus
///
/// Only has an effect when compiled with the `prometheus` feature; otherwise
/// it is a no-op that is still safe to call.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let _ = builder.install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}
