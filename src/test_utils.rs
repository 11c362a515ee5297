//! Test utilities for cdcwatch
//!
//! Temporary files, change-event fixtures, and an in-process Kafka cluster
//! shared by the unit tests.

use crate::cdc::{Classified, MessageHandler, RawMessage};
use crate::config::KafkaSettings;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{BaseProducer, BaseRecord, DefaultProducerContext, Producer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Topic used by the fixtures
pub const TEST_TOPIC: &str = "mongodb.testdb.users";

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given content
///
/// # Panics
///
/// Panics if file creation or writing fails
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// A create event for `{"id": 1}` in `testdb.users`
pub fn create_payload() -> Vec<u8> {
    br#"{"op":"c","after":{"id":1},"source":{"db":"testdb","collection":"users"},"ts_ms":1000}"#
        .to_vec()
}

/// A MongoDB-style update event carrying `before`, `after`, and `patch`
pub fn update_payload() -> Vec<u8> {
    br#"{
        "op": "u",
        "before": {"id": 1, "name": "old"},
        "after": {"id": 1, "name": "new"},
        "patch": {"$set": {"name": "new"}},
        "source": {"version": "2.4.0", "connector": "mongodb", "db": "testdb", "collection": "users", "ts_ms": 1999},
        "ts_ms": 2000
    }"#
    .to_vec()
}

/// A message on partition `partition` of [`TEST_TOPIC`]
pub fn raw_message(partition: i32, offset: i64, payload: impl Into<Vec<u8>>) -> RawMessage {
    RawMessage::new(TEST_TOPIC, partition, offset, payload.into())
}

/// An in-process cluster with `topic` created on `partitions` partitions
///
/// # Panics
///
/// Panics if the cluster or the topic cannot be created
pub fn mock_cluster(topic: &str, partitions: i32) -> MockCluster<'static, DefaultProducerContext> {
    let cluster = MockCluster::new(1).expect("Failed to start mock cluster");
    cluster
        .create_topic(topic, partitions, 1)
        .expect("Failed to create mock topic");
    cluster
}

/// Kafka settings pointing at `bootstrap` with short group timeouts
pub fn kafka_settings(bootstrap: &str, topic: &str, group_id: &str) -> KafkaSettings {
    KafkaSettings {
        brokers: bootstrap.to_string(),
        topic: topic.to_string(),
        group_id: group_id.to_string(),
        session_timeout_ms: 10_000,
        heartbeat_interval_ms: 1_000,
        ..Default::default()
    }
}

/// Produce `payloads` to one partition and wait for delivery
///
/// # Panics
///
/// Panics if a record cannot be enqueued or the flush times out
pub fn produce(bootstrap: &str, topic: &str, partition: i32, payloads: &[Vec<u8>]) {
    let producer: BaseProducer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap)
        .create()
        .expect("Failed to create producer");
    for payload in payloads {
        producer
            .send(
                BaseRecord::to(topic)
                    .partition(partition)
                    .key("")
                    .payload(payload.as_slice()),
            )
            .map_err(|(e, _)| e)
            .expect("Failed to enqueue record");
    }
    producer
        .flush(Duration::from_secs(10))
        .expect("Failed to flush producer");
}

/// Offsets committed for `group_id` on partitions `0..partitions` of `topic`
///
/// # Panics
///
/// Panics if the committed offsets cannot be fetched
pub fn committed_offsets(
    bootstrap: &str,
    topic: &str,
    group_id: &str,
    partitions: i32,
) -> Vec<Offset> {
    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap)
        .set("group.id", group_id)
        .create()
        .expect("Failed to create offset reader");
    let mut tpl = TopicPartitionList::new();
    for partition in 0..partitions {
        tpl.add_partition(topic, partition);
    }
    let committed = consumer
        .committed_offsets(tpl, Duration::from_secs(10))
        .expect("Failed to fetch committed offsets");
    (0..partitions)
        .map(|partition| {
            committed
                .find_partition(topic, partition)
                .map(|elem| elem.offset())
                .unwrap_or(Offset::Invalid)
        })
        .collect()
}

/// Records `(partition, offset)` for every message it handles
#[derive(Debug, Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<(i32, i64)>>,
}

impl RecordingHandler {
    /// Everything handled so far, in arrival order
    pub fn seen(&self) -> Vec<(i32, i64)> {
        self.seen.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were handled
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.seen.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait::async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(
        &self,
        message: &RawMessage,
        _classified: &Classified,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.seen
            .lock()
            .unwrap()
            .push((message.partition, message.offset));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::{classify, Classified, Operation};

    #[test]
    fn test_create_test_file() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "test.txt", "content");
        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "content");
    }

    #[test]
    fn test_fixtures_classify_as_changes() {
        for (payload, op) in [
            (create_payload(), Operation::Create),
            (update_payload(), Operation::Update),
        ] {
            match classify(&payload) {
                Classified::Change(envelope) => assert_eq!(envelope.op, op),
                other => panic!("Expected change, got {}", other.kind()),
            }
        }
    }
}
