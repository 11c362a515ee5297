//! Payload classification.
//!
//! [`classify`] is a pure function of the payload bytes. Rules are applied
//! in order and the first match wins:
//!
//! 1. empty payload: [`Classified::Tombstone`] with [`TombstoneKind::Empty`]
//! 2. payload exactly `null`: [`Classified::Tombstone`] with [`TombstoneKind::Null`]
//! 3. payload decodes as a [`ChangeEnvelope`]: [`Classified::Change`]
//! 4. anything else: [`Classified::Unparsable`], with a best-effort
//!    diagnostic [`Fallback`]

use serde_json::{Map, Value as JsonValue};
use std::fmt;

use super::message::ChangeEnvelope;

/// Why a payload was treated as a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TombstoneKind {
    /// Zero-length payload.
    Empty,
    /// Payload is the literal `null`.
    Null,
}

impl TombstoneKind {
    /// Label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Null => "null",
        }
    }
}

/// Diagnostic rendering of a payload that is not a change envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Fallback {
    /// The payload is a JSON object, just not a valid envelope.
    Object(Map<String, JsonValue>),
    /// The payload is not a JSON object; kept as lossy UTF-8 text.
    Opaque(String),
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(map) => match serde_json::to_string(map) {
                Ok(json) => f.write_str(&json),
                Err(_) => write!(f, "{:?}", map),
            },
            Self::Opaque(text) => f.write_str(text),
        }
    }
}

/// A payload that could not be decoded as a change envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Unparsable {
    /// Envelope decoding error.
    pub error: String,
    /// Secondary rendering for diagnostics.
    pub fallback: Fallback,
}

/// Result of classifying one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Delete-completion marker without an envelope.
    Tombstone(TombstoneKind),
    /// Structured change event.
    Change(Box<ChangeEnvelope>),
    /// Neither a tombstone nor an envelope.
    Unparsable(Unparsable),
}

impl Classified {
    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tombstone(_) => "tombstone",
            Self::Change(_) => "change",
            Self::Unparsable(_) => "unparsable",
        }
    }
}

/// Classifies a message payload.
///
/// # Examples
///
/// ```
/// use cdcwatch::cdc::classifier::{classify, Classified, TombstoneKind};
///
/// assert_eq!(classify(b""), Classified::Tombstone(TombstoneKind::Empty));
/// assert_eq!(classify(b"null"), Classified::Tombstone(TombstoneKind::Null));
/// assert_eq!(classify(br#"{"op":"c"}"#).kind(), "change");
/// assert_eq!(classify(b"not valid json").kind(), "unparsable");
/// ```
pub fn classify(payload: &[u8]) -> Classified {
    if payload.is_empty() {
        return Classified::Tombstone(TombstoneKind::Empty);
    }
    if payload == b"null" {
        return Classified::Tombstone(TombstoneKind::Null);
    }

    match ChangeEnvelope::from_slice(payload) {
        Ok(envelope) => Classified::Change(Box::new(envelope)),
        Err(e) => Classified::Unparsable(Unparsable {
            error: e.to_string(),
            fallback: fallback(payload),
        }),
    }
}

fn fallback(payload: &[u8]) -> Fallback {
    match serde_json::from_slice::<Map<String, JsonValue>>(payload) {
        Ok(map) => Fallback::Object(map),
        Err(_) => Fallback::Opaque(String::from_utf8_lossy(payload).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::message::Operation;
    use serde_json::json;

    #[test]
    fn test_empty_payload_is_tombstone() {
        assert_eq!(classify(b""), Classified::Tombstone(TombstoneKind::Empty));
    }

    #[test]
    fn test_null_payload_is_tombstone() {
        assert_eq!(classify(b"null"), Classified::Tombstone(TombstoneKind::Null));
    }

    #[test]
    fn test_near_null_payloads_are_not_tombstones() {
        let payloads: [&[u8]; 5] = [b" null", b"null ", b"NULL", b"\"null\"", b"nul"];
        for payload in payloads {
            assert_ne!(
                classify(payload).kind(),
                "tombstone",
                "payload {:?} must not be a tombstone",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_create_envelope() {
        let payload =
            br#"{"op":"c","after":{"id":1},"source":{"db":"testdb","collection":"users"},"ts_ms":1000}"#;
        let Classified::Change(envelope) = classify(payload) else {
            panic!("expected a change envelope");
        };
        assert_eq!(envelope.op, Operation::Create);
        assert_eq!(envelope.after, Some(json!({"id": 1})));
        assert_eq!(envelope.source.db.as_deref(), Some("testdb"));
        assert_eq!(envelope.ts_ms, Some(1000));
    }

    #[test]
    fn test_invalid_json_is_opaque() {
        let Classified::Unparsable(unparsable) = classify(b"not valid json") else {
            panic!("expected unparsable");
        };
        assert_eq!(
            unparsable.fallback,
            Fallback::Opaque("not valid json".to_string())
        );
        assert!(!unparsable.error.is_empty());
    }

    #[test]
    fn test_wrong_field_types_fall_back_to_object() {
        let Classified::Unparsable(unparsable) = classify(br#"{"op": 5, "id": "x"}"#) else {
            panic!("expected unparsable");
        };
        let Fallback::Object(map) = &unparsable.fallback else {
            panic!("expected object fallback");
        };
        assert_eq!(map.get("id"), Some(&json!("x")));
        assert_eq!(unparsable.fallback.to_string(), r#"{"id":"x","op":5}"#);
    }

    #[test]
    fn test_json_array_is_unparsable_and_opaque() {
        let Classified::Unparsable(unparsable) = classify(b"[1,2]") else {
            panic!("expected unparsable");
        };
        assert_eq!(unparsable.fallback, Fallback::Opaque("[1,2]".to_string()));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let payloads: [&[u8]; 6] = [
            b"",
            b"null",
            br#"{"op":"u","patch":{"$set":{"a":1}}}"#,
            br#"{"op":"x"}"#,
            b"\xff\xfe garbage",
            br#"{"ts_ms":"late"}"#,
        ];
        for payload in payloads {
            assert_eq!(classify(payload), classify(payload));
        }
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Classified::Tombstone(TombstoneKind::Null).kind(), "tombstone");
        assert_eq!(TombstoneKind::Empty.as_str(), "empty");
    }
}
