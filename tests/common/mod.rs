use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use cdcwatch::cdc::{Classified, MessageHandler, RawMessage};
use cdcwatch::group::MemoryGroupHandle;

pub const TOPIC: &str = "mongodb.testdb.users";

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("cdcwatch.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn message(partition: i32, offset: i64, payload: &[u8]) -> RawMessage {
    RawMessage::new(TOPIC, partition, offset, payload.to_vec())
}

/// One handled message, with the offsets already committed for its
/// partition at the moment the handler ran.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Handled {
    pub partition: i32,
    pub offset: i64,
    pub classified: Classified,
    pub committed_before: Vec<i64>,
}

/// Handler that records what it saw and what had been committed so far
#[allow(dead_code)]
pub struct RecordingHandler {
    group: MemoryGroupHandle,
    handled: Mutex<Vec<Handled>>,
    fail: bool,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new(group: MemoryGroupHandle) -> Arc<Self> {
        Arc::new(Self {
            group,
            handled: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing(group: MemoryGroupHandle) -> Arc<Self> {
        Arc::new(Self {
            group,
            handled: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn handled(&self) -> Vec<Handled> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(
        &self,
        message: &RawMessage,
        classified: &Classified,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let committed_before = self
            .group
            .commits()
            .iter()
            .filter(|c| c.partition == message.partition)
            .map(|c| c.offset)
            .collect();
        self.handled.lock().unwrap().push(Handled {
            partition: message.partition,
            offset: message.offset,
            classified: classified.clone(),
            committed_before,
        });

        if self.fail {
            return Err("downstream sink rejected the event".into());
        }
        Ok(())
    }
}
