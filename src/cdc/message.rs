//! Change-event message types.
//!
//! [`RawMessage`] is a record as delivered by the broker. [`ChangeEnvelope`]
//! is the decoded form of a Debezium-style change event; image fields are
//! kept as untyped JSON because their shape depends on the source
//! collection.
//!
//! # Example
//!
//! ```rust
//! use cdcwatch::cdc::message::{ChangeEnvelope, Operation};
//!
//! let json = br#"{
//!   "op": "c",
//!   "after": {"id": 1},
//!   "source": {"db": "testdb", "collection": "users"},
//!   "ts_ms": 1000
//! }"#;
//!
//! let envelope = ChangeEnvelope::from_slice(json).unwrap();
//! assert_eq!(envelope.op, Operation::Create);
//! assert_eq!(envelope.source.db.as_deref(), Some("testdb"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A record delivered from one partition of the subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Topic the record was read from.
    pub topic: String,

    /// Partition the record was read from.
    pub partition: i32,

    /// Position within the partition.
    pub offset: i64,

    /// Broker or producer timestamp in epoch milliseconds.
    pub timestamp: Option<i64>,

    /// Record key.
    pub key: Option<Vec<u8>>,

    /// Record value; a missing value is empty.
    pub payload: Vec<u8>,
}

impl RawMessage {
    /// Creates a message without key or timestamp.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
            key: None,
            payload: payload.into(),
        }
    }

    /// Sets the timestamp in epoch milliseconds.
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    /// Sets the record key.
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Timestamp as a UTC date-time, when present and representable.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::from_timestamp_millis)
    }

    /// Payload rendered as text, replacing invalid UTF-8 sequences.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Kind of change carried by an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    /// Row or document inserted (`c`).
    Create,
    /// Row or document modified (`u`).
    Update,
    /// Row or document removed (`d`).
    Delete,
    /// Snapshot read (`r`).
    Read,
    /// Any other code, kept verbatim. A missing code is the empty string.
    Unknown(String),
}

impl Operation {
    /// Single-character code as sent by the connector.
    pub fn code(&self) -> &str {
        match self {
            Self::Create => "c",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Read => "r",
            Self::Unknown(code) => code,
        }
    }

    /// Human-readable name, also used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl From<String> for Operation {
    fn from(code: String) -> Self {
        match code.as_str() {
            "c" => Self::Create,
            "u" => Self::Update,
            "d" => Self::Delete,
            "r" => Self::Read,
            _ => Self::Unknown(code),
        }
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.code().to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connector metadata describing where a change came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Connector version.
    pub version: Option<String>,

    /// Connector type (e.g., "mongodb", "postgresql").
    pub connector: Option<String>,

    /// Logical server name.
    pub name: Option<String>,

    /// Time the change was made in the source, epoch milliseconds.
    pub ts_ms: Option<i64>,

    /// Snapshot marker; connectors send a boolean or a string.
    pub snapshot: Option<JsonValue>,

    /// Database name.
    pub db: Option<String>,

    /// Replica set name (MongoDB).
    pub rs: Option<String>,

    /// Collection name (MongoDB).
    pub collection: Option<String>,

    /// Schema name (relational connectors).
    pub schema: Option<String>,

    /// Table name (relational connectors).
    pub table: Option<String>,
}

impl SourceMetadata {
    /// Collection name, falling back to the table name.
    pub fn collection_or_table(&self) -> Option<&str> {
        self.collection.as_deref().or(self.table.as_deref())
    }
}

/// Decoded change event.
///
/// Every field is optional on the wire. JSON `null` images are treated as
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    /// State before the change.
    #[serde(default)]
    pub before: Option<JsonValue>,

    /// State after the change.
    #[serde(default)]
    pub after: Option<JsonValue>,

    /// Update description (MongoDB).
    #[serde(default)]
    pub patch: Option<JsonValue>,

    /// Document filter identifying the changed document (MongoDB).
    #[serde(default)]
    pub filter: Option<JsonValue>,

    /// Connector metadata.
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: SourceMetadata,

    /// Operation code.
    #[serde(default, deserialize_with = "null_as_default")]
    pub op: Operation,

    /// Time the connector processed the event, epoch milliseconds.
    #[serde(default)]
    pub ts_ms: Option<i64>,

    /// Transaction metadata.
    #[serde(default)]
    pub transaction: Option<JsonValue>,
}

impl ChangeEnvelope {
    /// Decodes an envelope from payload bytes.
    ///
    /// The payload must be a JSON object. An object of the shape
    /// `{"schema": ..., "payload": {...}}`, as produced by converters with
    /// schemas enabled, is unwrapped first.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for invalid JSON, for a top-level value
    /// that is not an object, or for fields of the wrong type.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let value: JsonValue = serde_json::from_slice(payload)?;
        let JsonValue::Object(mut object) = value else {
            return Err(<serde_json::Error as serde::de::Error>::custom(
                "change envelope must be a JSON object",
            ));
        };

        if object.contains_key("schema") && object.get("payload").is_some_and(JsonValue::is_object)
        {
            if let Some(inner) = object.remove("payload") {
                return serde_json::from_value(inner);
            }
        }

        serde_json::from_value(JsonValue::Object(object))
    }

    /// Envelope timestamp as a UTC date-time.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.ts_ms.and_then(DateTime::from_timestamp_millis)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_codes() {
        assert_eq!(Operation::from("c".to_string()), Operation::Create);
        assert_eq!(Operation::from("u".to_string()), Operation::Update);
        assert_eq!(Operation::from("d".to_string()), Operation::Delete);
        assert_eq!(Operation::from("r".to_string()), Operation::Read);
        assert_eq!(
            Operation::from("t".to_string()),
            Operation::Unknown("t".to_string())
        );
        assert_eq!(Operation::Unknown("t".to_string()).code(), "t");
        assert_eq!(Operation::Read.to_string(), "read");
    }

    #[test]
    fn test_envelope_full_mongodb_update() {
        let payload = json!({
            "before": null,
            "after": null,
            "patch": "{\"$set\": {\"name\": \"bob\"}}",
            "filter": "{\"_id\": {\"$oid\": \"65f\"}}",
            "source": {
                "version": "1.9.7.Final",
                "connector": "mongodb",
                "name": "mongodb",
                "ts_ms": 1700000000000i64,
                "snapshot": "false",
                "db": "testdb",
                "rs": "rs0",
                "collection": "users"
            },
            "op": "u",
            "ts_ms": 1700000000123i64,
            "transaction": null
        });
        let envelope = ChangeEnvelope::from_slice(payload.to_string().as_bytes()).unwrap();

        assert_eq!(envelope.op, Operation::Update);
        assert!(envelope.before.is_none());
        assert!(envelope.after.is_none());
        assert!(envelope.patch.is_some());
        assert!(envelope.filter.is_some());
        assert!(envelope.transaction.is_none());
        assert_eq!(envelope.source.rs.as_deref(), Some("rs0"));
        assert_eq!(envelope.source.collection_or_table(), Some("users"));
        assert_eq!(
            envelope.timestamp().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20.123+00:00"
        );
    }

    #[test]
    fn test_envelope_missing_fields_default() {
        let envelope = ChangeEnvelope::from_slice(br#"{"unrelated": true}"#).unwrap();
        assert_eq!(envelope.op, Operation::Unknown(String::new()));
        assert_eq!(envelope.source, SourceMetadata::default());
        assert!(envelope.ts_ms.is_none());
    }

    #[test]
    fn test_envelope_null_source_and_op() {
        let envelope = ChangeEnvelope::from_slice(br#"{"source": null, "op": null}"#).unwrap();
        assert_eq!(envelope.op, Operation::default());
        assert!(envelope.source.db.is_none());
    }

    #[test]
    fn test_envelope_schema_wrapper_unwrapped() {
        let payload = json!({
            "schema": {"type": "struct"},
            "payload": {
                "op": "d",
                "before": {"id": 7},
                "source": {"db": "inventory", "table": "orders"}
            }
        });
        let envelope = ChangeEnvelope::from_slice(payload.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.op, Operation::Delete);
        assert_eq!(envelope.before, Some(json!({"id": 7})));
        assert_eq!(envelope.source.collection_or_table(), Some("orders"));
    }

    #[test]
    fn test_envelope_rejects_non_object() {
        assert!(ChangeEnvelope::from_slice(b"[1, 2, 3]").is_err());
        assert!(ChangeEnvelope::from_slice(b"\"c\"").is_err());
        assert!(ChangeEnvelope::from_slice(b"not valid json").is_err());
    }

    #[test]
    fn test_envelope_rejects_wrong_field_type() {
        assert!(ChangeEnvelope::from_slice(br#"{"op": "c", "ts_ms": "soon"}"#).is_err());
    }

    #[test]
    fn test_raw_message_helpers() {
        let message = RawMessage::new("users", 2, 42, b"\xffnull".to_vec())
            .with_timestamp(1000)
            .with_key(b"k".to_vec());
        assert_eq!(message.timestamp_utc().unwrap().timestamp_millis(), 1000);
        assert_eq!(message.key.as_deref(), Some(&b"k"[..]));
        assert_eq!(message.payload_lossy(), "\u{fffd}null");
    }
}
